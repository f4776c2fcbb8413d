use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tweet_sentiment::config::Config;
use tweet_sentiment::feed::{RateLimitedFetcher, ReqwestTransport};
use tweet_sentiment::pipeline::Pipeline;
use tweet_sentiment::scoring::ProcessScorer;
use tweet_sentiment::server;
use tweet_sentiment::staging::StagingStore;

/// `--config <path>`, defaulting to ./config.toml
fn config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tweet_sentiment=info,tower_http=info")),
        )
        .init();

    let config = Config::load(&config_path())?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();
    let credential = Config::bearer_token();
    if credential.is_none() {
        tracing::error!("TWITTER_BEARER_TOKEN is not set; every analysis request will fail");
    }

    let transport = ReqwestTransport::new(config.x_api.request_timeout())
        .context("failed to build HTTP client")?;
    let fetcher = Arc::new(RateLimitedFetcher::new(
        Arc::new(transport),
        credential,
        config.x_api.fallback_retry_after(),
    ));

    std::fs::create_dir_all(&config.staging.root).with_context(|| {
        format!("failed to create staging root {}", config.staging.root.display())
    })?;
    let store = Arc::new(StagingStore::new(&config.staging));

    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let scorer = ProcessScorer::new(&config.scoring, store.clone()).resolve_paths(&cwd);

    let pipeline = Arc::new(Pipeline::new(fetcher, &config.x_api, store, Arc::new(scorer)));
    let app = server::router(pipeline);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("server is running on http://{}", addr);
    axum::serve(listener, app).await?;

    tracing::debug!("shutting down");
    Ok(())
}
