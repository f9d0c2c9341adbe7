use async_trait::async_trait;

use super::client::HttpClient;

/// Plain [`reqwest::Client`] wrapper. Gzip response decoding is enabled by
/// the crate feature, which the NextBus feed expects.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
