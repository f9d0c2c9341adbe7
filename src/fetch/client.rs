use async_trait::async_trait;
use reqwest::{Request, Response};

/// Abstraction over the HTTP transport used by feed pollers. Implementations
/// must be safe to share across all agency aggregators concurrently.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
