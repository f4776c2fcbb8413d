use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable upstream account identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A post as returned upstream. Fields we don't model pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── X API v2 Deserialization ─────────────────────────────────────────

/// `GET /users/by/username/{handle}`
#[derive(Debug, Deserialize)]
pub struct UserLookupResponse {
    pub data: Option<UserData>,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub id: Option<String>,
    /// Canonical casing as stored upstream.
    #[serde(default)]
    pub username: Option<String>,
}

/// `GET /users/{id}/tweets`
#[derive(Debug, Deserialize)]
pub struct TimelineResponse {
    #[serde(default)]
    pub data: Option<Vec<RawPost>>,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

/// Partial-error entry the API returns alongside (or instead of) `data`.
#[derive(Debug, Deserialize)]
pub struct ApiProblem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Join problem details into one line for diagnostics.
pub fn describe_problems(problems: &[ApiProblem]) -> Option<String> {
    let parts: Vec<&str> = problems
        .iter()
        .filter_map(|p| p.detail.as_deref().or(p.title.as_deref()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
