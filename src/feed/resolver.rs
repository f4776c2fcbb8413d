use super::fetcher::{FetchRequest, RateLimitedFetcher};
use super::types::{describe_problems, AccountId, UserLookupResponse};
use crate::error::{PipelineError, Result};
use std::sync::Arc;

/// Profile URL prefixes accepted in place of a bare handle.
const PROFILE_PREFIXES: &[&str] = &[
    "https://x.com/",
    "https://www.x.com/",
    "https://twitter.com/",
    "https://www.twitter.com/",
    "http://x.com/",
    "http://www.x.com/",
    "http://twitter.com/",
    "http://www.twitter.com/",
];

const MAX_HANDLE_LEN: usize = 15;

/// Turn a caller-supplied handle or profile URL into a bare handle.
/// "https://x.com/alice/" -> "alice", "@alice" -> "alice"
pub fn normalize_handle(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();

    let handle = match PROFILE_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
        Some(prefix) => {
            let path = &raw[prefix.len()..];
            let path = path.split(['?', '#']).next().unwrap_or("");
            path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
        }
        None => raw,
    };

    handle.trim_start_matches('@').to_string()
}

fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub struct AccountResolver {
    fetcher: Arc<RateLimitedFetcher>,
    base_url: String,
    retry_budget: u32,
}

impl AccountResolver {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, base_url: &str, retry_budget: u32) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_budget,
        }
    }

    /// Resolve a handle (or profile URL) to its account id.
    pub async fn resolve(&self, raw_handle: &str) -> Result<AccountId> {
        let handle = normalize_handle(raw_handle);
        if !is_valid_handle(&handle) {
            return Err(PipelineError::resolution(format!(
                "'{}' is not a valid handle",
                raw_handle.trim()
            )));
        }

        let url = format!("{}/users/by/username/{}", self.base_url, handle);
        let resp: UserLookupResponse = self
            .fetcher
            .fetch_json(&FetchRequest::new(url, self.retry_budget))
            .await?;

        let (id, username) = match resp.data {
            Some(data) => (data.id.and_then(AccountId::new), data.username),
            None => (None, None),
        };

        match id {
            Some(id) => {
                tracing::debug!(
                    handle = %handle,
                    username = username.as_deref().unwrap_or(&handle),
                    account_id = %id,
                    "resolved handle"
                );
                Ok(id)
            }
            None => {
                let detail = describe_problems(&resp.errors)
                    .unwrap_or_else(|| "response has no account id".to_string());
                Err(PipelineError::resolution(format!(
                    "user '{}' not found: {}",
                    handle, detail
                )))
            }
        }
    }
}
