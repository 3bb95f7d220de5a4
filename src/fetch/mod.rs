mod client;
mod basic;
pub mod auth;

pub use client::HttpClient;
pub use basic::BasicClient;

use anyhow::{Result, bail};

/// Performs a GET against `url` and returns the response body.
///
/// Non-success HTTP statuses are reported as errors so callers can treat
/// them the same as transport failures.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse()?,
    );

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("feed returned HTTP {status}");
    }
    Ok(resp.bytes().await?.to_vec())
}
