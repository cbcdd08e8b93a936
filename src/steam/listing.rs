//! Catalog listing: cursor-paged sweep of the published app list.
//!
//! One page of results plus a continuation cursor; the pass is over when the
//! endpoint reports no further results.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::HarvesterConfig;
use crate::steam::{get_json_with_backoff, CandidateEntry};

#[derive(Debug, Clone)]
pub struct ListingPage {
    pub entries: Vec<CandidateEntry>,
    pub has_more: bool,
    pub next_cursor: Option<u32>,
}

#[async_trait]
pub trait AppListing: Send + Sync {
    /// Fetch one page starting after `cursor` (None = from the beginning).
    async fn page(&self, cursor: Option<u32>) -> anyhow::Result<ListingPage>;
}

#[derive(Debug, Deserialize)]
struct AppListResp {
    response: ListResponse,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    apps: Vec<ListedApp>,
    #[serde(default)]
    have_more_results: bool,
    #[serde(default)]
    last_appid: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ListedApp {
    appid: u32,
    #[serde(default)]
    name: String,
}

pub struct SteamAppListing {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl SteamAppListing {
    pub fn new(cfg: &HarvesterConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.api_base_url.clone(),
            page_size: cfg.scan.listing_page_size,
        })
    }
}

#[async_trait]
impl AppListing for SteamAppListing {
    async fn page(&self, cursor: Option<u32>) -> anyhow::Result<ListingPage> {
        let url = format!("{}/IStoreService/GetAppList/v1/", self.base_url);
        let mut query: Vec<(&str, String)> =
            vec![("max_results", self.page_size.to_string())];
        if let Some(last_appid) = cursor {
            query.push(("last_appid", last_appid.to_string()));
        }
        let body = get_json_with_backoff(&self.client, &url, &query).await?;
        let parsed: AppListResp = serde_json::from_value(body)?;

        let entries = parsed
            .response
            .apps
            .into_iter()
            .map(|app| CandidateEntry {
                appid: app.appid,
                name: app.name,
            })
            .collect();
        Ok(ListingPage {
            entries,
            has_more: parsed.response.have_more_results,
            next_cursor: parsed.response.last_appid,
        })
    }
}
