//! End-to-end analysis run: resolve -> collect -> stage -> score.
//!
//! Stages run strictly in order and the first failure ends the run. Only the
//! fetcher retries (on 429); nothing here recovers.

use crate::config::XApiConfig;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::feed::{AccountResolver, PostCollector, RateLimitedFetcher};
use crate::scoring::{validate_batch, ScoredPost, ScoringCapability};
use crate::staging::StagingStore;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Resolving,
    Collecting,
    Staging,
    Scoring,
    Complete,
    Failed(ErrorKind),
}

/// Outcome of one run plus the stages it went through.
#[derive(Debug)]
pub struct RunReport {
    pub request_id: Uuid,
    pub stages: Vec<Stage>,
    pub result: Result<Vec<ScoredPost>>,
}

struct RunTracker {
    request_id: Uuid,
    stages: Vec<Stage>,
}

impl RunTracker {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            stages: vec![Stage::Idle],
        }
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!(request_id = %self.request_id, stage = ?stage, "pipeline stage");
        self.stages.push(stage);
    }
}

pub struct Pipeline {
    fetcher: Arc<RateLimitedFetcher>,
    resolver: AccountResolver,
    collector: PostCollector,
    store: Arc<StagingStore>,
    scorer: Arc<dyn ScoringCapability>,
    page_size: u32,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        api: &XApiConfig,
        store: Arc<StagingStore>,
        scorer: Arc<dyn ScoringCapability>,
    ) -> Self {
        Self {
            resolver: AccountResolver::new(fetcher.clone(), &api.base_url, api.retry_budget),
            collector: PostCollector::new(fetcher.clone(), &api.base_url, api.retry_budget),
            fetcher,
            store,
            scorer,
            page_size: api.effective_page_size(),
        }
    }

    /// Fails with `ConfigurationError` when no bearer credential was supplied.
    pub fn ensure_configured(&self) -> Result<()> {
        if self.fetcher.has_credential() {
            Ok(())
        } else {
            Err(PipelineError::configuration("TWITTER_BEARER_TOKEN is not set"))
        }
    }

    pub async fn run(&self, handle: &str) -> Result<Vec<ScoredPost>> {
        self.run_traced(handle).await.result
    }

    pub async fn run_traced(&self, handle: &str) -> RunReport {
        let request_id = Uuid::new_v4();
        let mut tracker = RunTracker::new(request_id);

        let result = self.run_stages(&mut tracker, handle).await;
        match &result {
            Ok(scored) => {
                tracker.advance(Stage::Complete);
                tracing::info!(request_id = %request_id, count = scored.len(), "analysis complete");
            }
            Err(e) => {
                tracker.advance(Stage::Failed(e.kind));
                tracing::warn!(request_id = %request_id, kind = %e.kind, error = %e.message, "analysis failed");
            }
        }

        RunReport {
            request_id,
            stages: tracker.stages,
            result,
        }
    }

    async fn run_stages(&self, tracker: &mut RunTracker, handle: &str) -> Result<Vec<ScoredPost>> {
        self.ensure_configured()?;

        tracker.advance(Stage::Resolving);
        let account_id = self.resolver.resolve(handle).await?;

        tracker.advance(Stage::Collecting);
        let posts = self.collector.collect(&account_id, self.page_size).await?;

        tracker.advance(Stage::Staging);
        // Dropping `staged` removes the run directory on every outcome below.
        let staged = self.store.write(tracker.request_id, &posts)?;

        tracker.advance(Stage::Scoring);
        let scored = self.scorer.score(&staged).await?;
        validate_batch(&staged, scored)
    }
}
