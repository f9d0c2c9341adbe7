//! Process-wide HTTP fetch seam.
//!
//! All agency pollers share one stateless client behind the [`HttpClient`]
//! trait so feed transport can be swapped out in tests.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;

/// Fetches a URL and returns the raw response body.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        return Err(anyhow::anyhow!("feed returned status {}", resp.status()));
    }
    Ok(resp.bytes().await?.to_vec())
}
