//! Per-request staging area shared with the scoring process.
//!
//! Every run writes into its own directory under the configured root, so
//! concurrent requests never see each other's input or output. The directory
//! is removed when the [`StagedBatch`] handle is dropped unless artifacts are
//! retained.

use crate::config::StagingConfig;
use crate::error::{PipelineError, Result};
use crate::feed::types::RawPost;
use crate::scoring::ScoredPost;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// On-disk shape of the staged input.
#[derive(Debug, Serialize, Deserialize)]
struct StagedInput {
    request_id: Uuid,
    staged_at: chrono::DateTime<chrono::Utc>,
    tweets: Vec<RawPost>,
}

/// On-disk shape of the scoring output.
#[derive(Debug, Serialize, Deserialize)]
struct ScoredOutput {
    analyzed_tweets: Vec<ScoredPost>,
}

pub struct StagingStore {
    root: PathBuf,
    input_file: String,
    output_file: String,
    retain_artifacts: bool,
}

/// Handle to one run's staged batch. Owns the run directory.
#[derive(Debug)]
pub struct StagedBatch {
    request_id: Uuid,
    dir: PathBuf,
    input_path: PathBuf,
    output_path: PathBuf,
    post_ids: Vec<String>,
    retain: bool,
}

impl StagedBatch {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Ids of the staged posts, in staged order.
    pub fn post_ids(&self) -> &[String] {
        &self.post_ids
    }

    pub fn len(&self) -> usize {
        self.post_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.post_ids.is_empty()
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        if self.retain {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::internal(format!("failed to {} {}: {}", action, path.display(), err)).with_cause(err)
}

/// Write via a temp file and rename, so readers never observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("staged");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, bytes).map_err(|e| io_error("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error("rename", path, e))
}

impl StagingStore {
    pub fn new(config: &StagingConfig) -> Self {
        Self {
            root: config.root.clone(),
            input_file: config.input_file.clone(),
            output_file: config.output_file.clone(),
            retain_artifacts: config.retain_artifacts,
        }
    }

    /// Persist a batch under a fresh run directory. Complete on return.
    pub fn write(&self, request_id: Uuid, posts: &[RawPost]) -> Result<StagedBatch> {
        let run_name = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            request_id
        );
        let dir = self.root.join(run_name);
        std::fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
        let dir = std::fs::canonicalize(&dir).map_err(|e| io_error("resolve", &dir, e))?;

        // Handle exists from here on, so a failed write still cleans up.
        let staged = StagedBatch {
            request_id,
            input_path: dir.join(&self.input_file),
            output_path: dir.join(&self.output_file),
            dir,
            post_ids: posts.iter().map(|p| p.id.clone()).collect(),
            retain: self.retain_artifacts,
        };

        let envelope = StagedInput {
            request_id,
            staged_at: chrono::Utc::now(),
            tweets: posts.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|e| {
            PipelineError::serialization(format!("failed to encode staged batch: {}", e)).with_cause(e)
        })?;
        write_atomic(&staged.input_path, &bytes)?;

        tracing::debug!(
            request_id = %request_id,
            path = %staged.input_path.display(),
            count = staged.len(),
            "staged batch"
        );
        Ok(staged)
    }

    /// Read the staged input back.
    pub fn read(&self, staged: &StagedBatch) -> Result<Vec<RawPost>> {
        let bytes = std::fs::read(&staged.input_path).map_err(|e| io_error("read", &staged.input_path, e))?;
        let envelope: StagedInput = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::serialization(format!(
                "staged batch {} is malformed: {}",
                staged.input_path.display(),
                e
            ))
            .with_cause(e)
        })?;
        Ok(envelope.tweets)
    }

    /// Scored output, or `None` when the scorer never wrote it.
    pub fn read_scored(&self, staged: &StagedBatch) -> Result<Option<Vec<ScoredPost>>> {
        let bytes = match std::fs::read(&staged.output_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &staged.output_path, e)),
        };
        let output: ScoredOutput = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::serialization(format!(
                "scored output {} is malformed: {}",
                staged.output_path.display(),
                e
            ))
            .with_cause(e)
        })?;
        Ok(Some(output.analyzed_tweets))
    }

    /// Write scored output the way an external scorer would.
    pub fn write_scored(&self, staged: &StagedBatch, scored: &[ScoredPost]) -> Result<()> {
        let output = ScoredOutput {
            analyzed_tweets: scored.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&output).map_err(|e| {
            PipelineError::serialization(format!("failed to encode scored output: {}", e)).with_cause(e)
        })?;
        write_atomic(&staged.output_path, &bytes)
    }
}
