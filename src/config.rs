use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_FILE: &str = ".env";
const BEARER_TOKEN_VAR: &str = "TWITTER_BEARER_TOKEN";

/// The upstream API rejects `max_results` outside this range.
pub const MIN_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub x_api: XApiConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 3000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct XApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Wait applied to a 429 that advertises no retry delay.
    #[serde(default = "default_fallback_retry_after_ms")]
    pub fallback_retry_after_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String { "https://api.twitter.com/2".to_string() }
fn default_page_size() -> u32 { 5 }
fn default_retry_budget() -> u32 { 5 }
fn default_fallback_retry_after_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 10_000 }

impl Default for XApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            retry_budget: default_retry_budget(),
            fallback_retry_after_ms: default_fallback_retry_after_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl XApiConfig {
    /// Page size clamped to what the upstream accepts.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }

    pub fn fallback_retry_after(&self) -> Duration {
        Duration::from_millis(self.fallback_retry_after_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,
    #[serde(default = "default_input_file")]
    pub input_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    /// Keep run directories after a terminal outcome (for auditing).
    #[serde(default)]
    pub retain_artifacts: bool,
}

fn default_staging_root() -> PathBuf { PathBuf::from("staging") }
fn default_input_file() -> String { "twitterAPIresults.json".to_string() }
fn default_output_file() -> String { "analyzed_tweets.json".to_string() }

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_staging_root(),
            input_file: default_input_file(),
            output_file: default_output_file(),
            retain_artifacts: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScoringConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Unset means the scoring process may run indefinitely.
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

impl ScoringConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_s.map(Duration::from_secs)
    }
}

/// Bearer credential for the upstream API.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Returns `None` for values that are empty once invisible characters are stripped.
    pub fn new(raw: &str) -> Option<Self> {
        let token = sanitize_key(raw);
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .with_context(|| "Failed to parse config TOML")?;
        if config.scoring.program.trim().is_empty() {
            anyhow::bail!("scoring.program cannot be empty");
        }
        if config.x_api.page_size != config.x_api.effective_page_size() {
            tracing::warn!(
                configured = config.x_api.page_size,
                effective = config.x_api.effective_page_size(),
                "x_api.page_size out of range, clamping"
            );
        }
        Ok(config)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// Read once at startup; the result is injected into the fetcher.
    pub fn bearer_token() -> Option<BearerToken> {
        std::env::var(BEARER_TOKEN_VAR)
            .ok()
            .and_then(|raw| BearerToken::new(&raw))
    }
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}
