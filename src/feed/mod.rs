pub mod collector;
pub mod fetcher;
pub mod http;
pub mod resolver;
pub mod types;

use async_trait::async_trait;
use fetcher::{TransportError, TransportResponse};

pub use collector::PostCollector;
pub use fetcher::{FetchError, FetchRequest, RateLimitedFetcher};
pub use http::ReqwestTransport;
pub use resolver::AccountResolver;

/// Single outbound GET. Implementations report every HTTP status as a
/// response; only connection-level failures are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError>;
}
