//! Startup configuration, resolved once and passed into each component.
//!
//! Nothing in the scan/enrich core reads the process environment directly;
//! everything it needs is captured here at boot. Missing or placeholder
//! credentials are a fatal precondition failure surfaced before the first
//! pass starts.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::util::env::{env_flag, env_opt, env_parse, preflight_check};

/// Placeholder values shipped in the documented .env template. Leaving them
/// unchanged is treated the same as not configuring the key at all.
const PLACEHOLDER_VALUES: [&str; 3] = ["your_sessionid", "your_steamLoginSecure", "your_github_token"];

/// Storefront session cookies. Opaque inputs; never logged unredacted.
#[derive(Debug, Clone)]
pub struct SteamLogin {
    pub sessionid: String,
    pub steam_login_secure: String,
}

/// Credentials and coordinates for the applist upload.
#[derive(Debug, Clone)]
pub struct GithubLogin {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HarvestMode {
    /// Sweep the numeric ID space one ID at a time, wrapping at the end.
    Brute,
    /// Page through the catalog listing endpoint until it reports no more.
    Listing,
}

impl HarvestMode {
    fn from_env() -> Self {
        match env_opt("HARVEST_MODE") {
            Some(value) => {
                let normalized = value.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    "listing" | "catalog" | "applist" => HarvestMode::Listing,
                    _ => HarvestMode::Brute,
                }
            }
            None => HarvestMode::Brute,
        }
    }
}

impl fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarvestMode::Brute => write!(f, "brute"),
            HarvestMode::Listing => write!(f, "listing"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub mode: HarvestMode,
    /// Inclusive upper bound of the sweep. Defaults to the full u32 space.
    pub end_appid: u32,
    /// Candidates accumulated before the scanner hands a batch to the driver.
    pub batch_size: usize,
    /// Page size requested from the catalog listing endpoint.
    pub listing_page_size: u32,
}

#[derive(Debug, Clone)]
pub struct EnrichSettings {
    pub concurrency: usize,
    pub per_item_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub steam: SteamLogin,
    /// None when HARVEST_PUBLISH=0; publishing is then skipped entirely.
    pub github: Option<GithubLogin>,
    pub store_base_url: String,
    pub api_base_url: String,
    pub appinfo_base_url: String,
    pub checkpoint_path: PathBuf,
    pub applist_path: PathBuf,
    pub idle_wait: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub scan: ScanSettings,
    pub enrich: EnrichSettings,
}

fn credential(key: &str) -> Result<String> {
    match env_opt(key) {
        Some(v) if !PLACEHOLDER_VALUES.contains(&v.trim()) => Ok(v),
        Some(_) => bail!("{key} still contains the placeholder value; update it before running"),
        None => bail!("missing required credential {key}"),
    }
}

impl HarvesterConfig {
    /// Resolve the full configuration from the environment (and .env).
    ///
    /// Errors here are fatal preconditions: the caller is expected to log and
    /// exit non-zero without starting a scan/enrich cycle.
    pub fn from_env() -> Result<Self> {
        let publish_enabled = env_flag("HARVEST_PUBLISH", true);

        let mut required: Vec<&str> = vec!["STEAM_SESSIONID", "STEAM_LOGIN_SECURE"];
        if publish_enabled {
            required.extend(["GITHUB_TOKEN", "GITHUB_OWNER", "GITHUB_REPO"]);
        }
        preflight_check(
            "appid-harvester",
            &required,
            &[
                "HARVEST_MODE",
                "HARVEST_END_APPID",
                "HARVEST_BATCH_SIZE",
                "HARVEST_IDLE_WAIT_SECS",
                "HARVEST_PUBLISH",
                "ENRICH_CONCURRENCY",
                "ENRICH_TIMEOUT_SECS",
                "ENRICH_MAX_RETRIES",
                "STEAM_SESSIONID",
                "GITHUB_REPO",
            ],
        )?;

        let steam = SteamLogin {
            sessionid: credential("STEAM_SESSIONID")?,
            steam_login_secure: credential("STEAM_LOGIN_SECURE")?,
        };

        let github = if publish_enabled {
            Some(GithubLogin {
                token: credential("GITHUB_TOKEN")?,
                owner: credential("GITHUB_OWNER")?,
                repo: credential("GITHUB_REPO")?,
                branch: env_opt("GITHUB_BRANCH").unwrap_or_else(|| "main".into()),
            })
        } else {
            None
        };

        let scan = ScanSettings {
            mode: HarvestMode::from_env(),
            end_appid: env_parse("HARVEST_END_APPID", u32::MAX),
            batch_size: env_parse("HARVEST_BATCH_SIZE", 50usize).max(1),
            listing_page_size: env_parse("HARVEST_LISTING_PAGE_SIZE", 10_000u32).max(1),
        };

        let enrich = EnrichSettings {
            concurrency: env_parse("ENRICH_CONCURRENCY", 4usize).max(1),
            per_item_timeout: Duration::from_secs(env_parse("ENRICH_TIMEOUT_SECS", 10u64)),
            max_retries: env_parse("ENRICH_MAX_RETRIES", 4u32),
            retry_base_delay: Duration::from_millis(env_parse("ENRICH_BACKOFF_MS", 3000u64)),
        };

        Ok(Self {
            steam,
            github,
            store_base_url: env_opt("STEAM_STORE_BASE_URL")
                .unwrap_or_else(|| "https://store.steampowered.com".into()),
            api_base_url: env_opt("STEAM_API_BASE_URL")
                .unwrap_or_else(|| "https://api.steampowered.com".into()),
            appinfo_base_url: env_opt("STEAM_APPINFO_BASE_URL")
                .unwrap_or_else(|| "https://store.steampowered.com".into()),
            checkpoint_path: env_opt("HARVEST_CHECKPOINT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("last_tested_appID.txt")),
            applist_path: env_opt("HARVEST_APPLIST_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("applist.txt")),
            idle_wait: Duration::from_secs(env_parse("HARVEST_IDLE_WAIT_SECS", 1800u64)),
            http_timeout: Duration::from_secs(env_parse("HARVEST_HTTP_TIMEOUT_SECS", 15u64)),
            user_agent: env_opt("HARVEST_USER_AGENT")
                .unwrap_or_else(|| "appid-harvester/0.1".into()),
            scan,
            enrich,
        })
    }

    /// Cookie header sent with storefront requests. The birthtime pair keeps
    /// age-gated pages from bouncing to the age check instead of the app page.
    pub fn store_cookie_header(&self) -> String {
        format!(
            "birthtime=1044482401; lastagecheckage=6-February-2003; sessionid={}; steamLoginSecure={}",
            self.steam.sessionid, self.steam.steam_login_secure
        )
    }

    /// Path of the artifact inside the remote repository. Only the file name
    /// of the local path is used; the upload always lands at the repo root.
    pub fn remote_applist_path(&self) -> String {
        self.applist_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "applist.txt".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_credentials_are_rejected() {
        unsafe {
            std::env::set_var("TEST_PLACEHOLDER_CRED", "your_sessionid");
        }
        assert!(credential("TEST_PLACEHOLDER_CRED").is_err());
        unsafe {
            std::env::set_var("TEST_PLACEHOLDER_CRED", "real-value");
        }
        assert_eq!(credential("TEST_PLACEHOLDER_CRED").unwrap(), "real-value");
    }

    #[test]
    fn mode_display_round_trips() {
        assert_eq!(HarvestMode::Brute.to_string(), "brute");
        assert_eq!(HarvestMode::Listing.to_string(), "listing");
    }
}
