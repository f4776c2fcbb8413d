pub mod process;

use crate::error::{PipelineError, Result};
use crate::feed::types::RawPost;
use crate::staging::StagedBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use process::ProcessScorer;

/// Annotates a staged batch with sentiment and emotion.
///
/// The orchestrator only sees this trait, so the scorer can be a child
/// process, an in-process model, or a remote call.
#[async_trait]
pub trait ScoringCapability: Send + Sync {
    async fn score(&self, staged: &StagedBatch) -> Result<Vec<ScoredPost>>;
}

macro_rules! label_set {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} label '{}'", stringify!($name), other)),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(label: $name) -> String {
                label.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

label_set!(SentimentLabel {
    Negative => "negative",
    Neutral => "neutral",
    Positive => "positive",
});

label_set!(EmotionLabel {
    Anger => "anger",
    Disgust => "disgust",
    Fear => "fear",
    Joy => "joy",
    Love => "love",
    Neutral => "neutral",
    Sadness => "sadness",
    Surprise => "surprise",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore<L> {
    pub label: L,
    pub score: f64,
}

/// A post plus its sentiment and emotion annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    #[serde(flatten)]
    pub post: RawPost,
    pub sentiment: LabelScore<SentimentLabel>,
    pub emotion: LabelScore<EmotionLabel>,
}

/// Check a scorer's output against what was staged: same length, same ids in the same order.
pub fn validate_batch(staged: &StagedBatch, scored: Vec<ScoredPost>) -> Result<Vec<ScoredPost>> {
    if scored.len() != staged.len() {
        return Err(PipelineError::serialization(format!(
            "expected {} scored posts, got {}",
            staged.len(),
            scored.len()
        )));
    }

    if let Some((i, (s, expected))) = scored
        .iter()
        .zip(staged.post_ids())
        .enumerate()
        .find(|(_, (s, expected))| s.post.id != **expected)
    {
        return Err(PipelineError::serialization(format!(
            "scored post {} has id '{}', expected '{}'",
            i, s.post.id, expected
        )));
    }

    Ok(scored)
}
