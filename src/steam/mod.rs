//! Remote Steam collaborators: storefront probe, catalog listing, and the
//! per-app metadata service. Everything network-shaped lives behind a trait
//! so the scan/enrich core can be exercised without a network.

pub mod listing;
pub mod metadata;
pub mod storefront;

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An app ID confirmed to exist but not yet enriched with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub appid: u32,
    pub name: String,
}

/// GET a JSON endpoint, sleeping through 429s with escalating delays and
/// honoring Retry-After when the server sends a larger one.
pub(crate) async fn get_json_with_backoff(
    client: &Client,
    url: &str,
    query_pairs: &[(&str, String)],
) -> Result<Value> {
    let delays = [5u64, 10, 15, 20];
    let mut attempt: usize = 0;
    loop {
        let mut req = client.get(url).header("Accept", "application/json");
        if !query_pairs.is_empty() {
            req = req.query(&query_pairs);
        }
        let resp = req.send().await?;
        if resp.status().as_u16() != 429 {
            return resp
                .error_for_status()?
                .json::<Value>()
                .await
                .map_err(|e| anyhow!("invalid JSON from {url}: {e}"));
        }
        if attempt >= delays.len() {
            return Err(anyhow!("rate limited by {url} after {} attempts", attempt + 1));
        }
        let mut sleep_secs = delays[attempt];
        if let Some(retry_after) = resp
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
        {
            if retry_after > sleep_secs {
                sleep_secs = retry_after;
            }
        }
        attempt += 1;
        tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
    }
}
