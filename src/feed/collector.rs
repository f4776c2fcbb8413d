use super::fetcher::{FetchRequest, RateLimitedFetcher};
use super::types::{describe_problems, AccountId, RawPost, TimelineResponse};
use crate::error::{PipelineError, Result};
use std::sync::Arc;

pub struct PostCollector {
    fetcher: Arc<RateLimitedFetcher>,
    base_url: String,
    retry_budget: u32,
}

impl PostCollector {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, base_url: &str, retry_budget: u32) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_budget,
        }
    }

    fn build_url(&self, account_id: &AccountId, limit: u32) -> String {
        format!(
            "{}/users/{}/tweets?max_results={}&tweet.fields=created_at",
            self.base_url, account_id, limit
        )
    }

    /// Most recent posts for an account, newest first, at most `limit`.
    /// An empty timeline is an error: nothing downstream handles zero posts.
    pub async fn collect(&self, account_id: &AccountId, limit: u32) -> Result<Vec<RawPost>> {
        let url = self.build_url(account_id, limit);
        let resp: TimelineResponse = self
            .fetcher
            .fetch_json(&FetchRequest::new(url, self.retry_budget))
            .await?;

        let mut posts = resp.data.unwrap_or_default();
        if posts.is_empty() {
            let detail = describe_problems(&resp.errors).unwrap_or_else(|| "empty timeline".to_string());
            return Err(PipelineError::resolution(format!(
                "no posts for account {}: {}",
                account_id, detail
            )));
        }

        posts.truncate(limit as usize);
        tracing::debug!(account_id = %account_id, count = posts.len(), "collected posts");
        Ok(posts)
    }
}
