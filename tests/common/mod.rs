//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tweet_sentiment::config::{BearerToken, StagingConfig, XApiConfig};
use tweet_sentiment::error::Result;
use tweet_sentiment::feed::fetcher::{TransportError, TransportResponse};
use tweet_sentiment::feed::{HttpTransport, RateLimitedFetcher};
use tweet_sentiment::pipeline::Pipeline;
use tweet_sentiment::scoring::{EmotionLabel, LabelScore, ScoredPost, ScoringCapability, SentimentLabel};
use tweet_sentiment::staging::{StagedBatch, StagingStore};

pub const BASE_URL: &str = "https://api.test/2";

/// Upstream API stand-in. Each route answers from its queue; the last
/// response repeats once the queue is down to one.
pub struct FakeApi {
    routes: Mutex<Vec<(String, VecDeque<TransportResponse>)>>,
    urls: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn on(&self, url_fragment: &str, status: u16, body: &str) {
        let resp = TransportResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        };
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|(f, _)| f == url_fragment) {
            Some((_, queue)) => queue.push_back(resp),
            None => routes.push((url_fragment.to_string(), VecDeque::from([resp]))),
        }
    }

    /// Register a resolvable account with `count` posts whose ids are `{prefix}{n}`.
    pub fn account(&self, handle: &str, id: &str, prefix: &str, count: usize) {
        self.on(&format!("/users/by/username/{}", handle), 200, &user_json(id));
        self.on(&format!("/users/{}/tweets", id), 200, &timeline_json(prefix, count));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeApi {
    async fn get(&self, url: &str, _headers: &[(String, String)]) -> std::result::Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let mut routes = self.routes.lock().unwrap();
        let Some((_, queue)) = routes.iter_mut().find(|(f, _)| url.contains(f.as_str())) else {
            return Ok(TransportResponse {
                status: 404,
                headers: Vec::new(),
                body: "no route".to_string(),
            });
        };
        let resp = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        resp.ok_or_else(|| TransportError("empty route".to_string()))
    }
}

pub fn user_json(id: &str) -> String {
    serde_json::json!({ "data": { "id": id, "name": "Test", "username": "test" } }).to_string()
}

pub fn timeline_json(prefix: &str, count: usize) -> String {
    let data: Vec<_> = (0..count)
        .map(|i| {
            serde_json::json!({
                "id": format!("{}{}", prefix, i),
                "text": format!("post {} from {}", i, prefix),
                "created_at": format!("2024-05-0{}T12:00:00.000Z", (i % 9) + 1),
                "edit_history_tweet_ids": [format!("{}{}", prefix, i)],
            })
        })
        .collect();
    serde_json::json!({ "data": data, "meta": { "result_count": count } }).to_string()
}

/// In-process scorer that behaves like the external program: reads the
/// staged input, writes the scored output file, then reads it back.
pub struct FakeScorer {
    store: Arc<StagingStore>,
    delay: Duration,
    drop_last: bool,
    calls: AtomicUsize,
}

impl FakeScorer {
    pub fn new(store: Arc<StagingStore>) -> Arc<Self> {
        Self::build(store, Duration::ZERO, false)
    }

    pub fn slow(store: Arc<StagingStore>, delay: Duration) -> Arc<Self> {
        Self::build(store, delay, false)
    }

    /// Loses the last post, like a model that skips a tweet it can't process.
    pub fn lossy(store: Arc<StagingStore>) -> Arc<Self> {
        Self::build(store, Duration::ZERO, true)
    }

    fn build(store: Arc<StagingStore>, delay: Duration, drop_last: bool) -> Arc<Self> {
        Arc::new(Self {
            store,
            delay,
            drop_last,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringCapability for FakeScorer {
    async fn score(&self, staged: &StagedBatch) -> Result<Vec<ScoredPost>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let posts = self.store.read(staged)?;
        tokio::time::sleep(self.delay).await;

        let mut scored: Vec<ScoredPost> = posts
            .into_iter()
            .map(|post| ScoredPost {
                post,
                sentiment: LabelScore { label: SentimentLabel::Positive, score: 0.91 },
                emotion: LabelScore { label: EmotionLabel::Joy, score: 0.77 },
            })
            .collect();
        if self.drop_last {
            scored.pop();
        }

        self.store.write_scored(staged, &scored)?;
        Ok(self.store.read_scored(staged)?.unwrap_or_default())
    }
}

pub fn api_config() -> XApiConfig {
    XApiConfig {
        base_url: BASE_URL.to_string(),
        page_size: 5,
        retry_budget: 2,
        fallback_retry_after_ms: 10,
        request_timeout_ms: 1000,
    }
}

pub fn staging_store(root: &Path) -> Arc<StagingStore> {
    Arc::new(StagingStore::new(&StagingConfig {
        root: root.to_path_buf(),
        ..StagingConfig::default()
    }))
}

pub fn pipeline(
    api: Arc<FakeApi>,
    token: Option<&str>,
    store: Arc<StagingStore>,
    scorer: Arc<dyn ScoringCapability>,
) -> Arc<Pipeline> {
    let config = api_config();
    let fetcher = Arc::new(RateLimitedFetcher::new(
        api,
        token.and_then(BearerToken::new),
        config.fallback_retry_after(),
    ));
    Arc::new(Pipeline::new(fetcher, &config, store, scorer))
}

/// Entries left under a staging root.
pub fn leftover_runs(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}
