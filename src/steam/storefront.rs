//! Storefront probe: classifies a single app ID by requesting its store page
//! without following redirects. A live page answers 200, a dead or hidden ID
//! bounces through a 302 to the front page.

use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, redirect, Client, StatusCode};
use tracing::debug;

use crate::config::HarvesterConfig;

/// Outcome of probing one app ID against the storefront.
///
/// `Unreachable` covers request errors and 5xx responses: the ID is treated
/// as missing for this pass but nothing about it is cached, so the next pass
/// probes it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A live, included app page. The name is best-effort from the page.
    Game { name: Option<String> },
    /// Exists but is an excluded category (DLC or soundtrack).
    Excluded,
    /// No page behind this ID right now.
    Missing,
    /// Transient failure talking to the storefront.
    Unreachable,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Game { name: Some(name) } => write!(f, "valid game ({name})"),
            ProbeOutcome::Game { name: None } => write!(f, "valid game"),
            ProbeOutcome::Excluded => write!(f, "excluded (dlc/soundtrack)"),
            ProbeOutcome::Missing => write!(f, "does not exist"),
            ProbeOutcome::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[async_trait]
pub trait StorefrontProbe: Send + Sync {
    async fn probe(&self, appid: u32) -> ProbeOutcome;
}

/// HTTP implementation against the real storefront.
pub struct StoreClient {
    client: Client,
    base_url: String,
    apphub_name: Regex,
}

// Marker classes the storefront renders on category bubbles. The page
// structure is flaky upstream, so exclusion is re-derived from the body on
// every probe rather than cached.
const DLC_MARKER: &str = "game_area_dlc_bubble";
const SOUNDTRACK_MARKER: &str = "game_area_soundtrack_bubble";

impl StoreClient {
    pub fn new(cfg: &HarvesterConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            header::HeaderValue::from_str(&cfg.store_cookie_header())?,
        );
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.store_base_url.clone(),
            apphub_name: Regex::new(r#"<div[^>]*class="apphub_AppName"[^>]*>([^<]+)</div>"#)?,
        })
    }

    fn extract_name(&self, body: &str) -> Option<String> {
        self.apphub_name
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// True when the page body carries a DLC or soundtrack bubble.
pub(crate) fn is_excluded_listing(body: &str) -> bool {
    body.contains(DLC_MARKER) || body.contains(SOUNDTRACK_MARKER)
}

#[async_trait]
impl StorefrontProbe for StoreClient {
    async fn probe(&self, appid: u32) -> ProbeOutcome {
        let url = format!("{}/app/{}", self.base_url, appid);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(appid, error = %err, "storefront request failed");
                return ProbeOutcome::Unreachable;
            }
        };
        match resp.status() {
            StatusCode::OK => {
                let body = match resp.text().await {
                    Ok(body) => body,
                    Err(err) => {
                        debug!(appid, error = %err, "storefront body read failed");
                        return ProbeOutcome::Unreachable;
                    }
                };
                if is_excluded_listing(&body) {
                    ProbeOutcome::Excluded
                } else {
                    ProbeOutcome::Game {
                        name: self.extract_name(&body),
                    }
                }
            }
            StatusCode::FOUND => ProbeOutcome::Missing,
            status if status.is_server_error() => ProbeOutcome::Unreachable,
            _ => ProbeOutcome::Missing,
        }
    }
}
