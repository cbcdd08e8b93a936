//! Publish hook: pushes the applist artifact to a GitHub repository after
//! every successful save. Strictly best-effort from the pipeline's point of
//! view; the local file is already durable when this runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::{GithubLogin, HarvesterConfig};

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, content: &[u8]) -> Result<()>;
}

pub struct GithubPublisher {
    client: Client,
    login: GithubLogin,
    remote_path: String,
    api_base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExistingContent {
    sha: String,
}

impl GithubPublisher {
    pub fn new(cfg: &HarvesterConfig, login: GithubLogin) -> Result<Self> {
        // GitHub's API rejects requests without a User-Agent.
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            client,
            login,
            remote_path: cfg.remote_applist_path(),
            api_base_url: "https://api.github.com".into(),
        })
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base_url, self.login.owner, self.login.repo, self.remote_path
        )
    }

    /// Sha of the existing remote file, if any. Updating without it makes the
    /// contents API reject the PUT as a conflict.
    async fn existing_sha(&self) -> Option<String> {
        let resp = self
            .client
            .get(self.contents_url())
            .bearer_auth(&self.login.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(&[("ref", self.login.branch.as_str())])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<ExistingContent>().await.ok().map(|c| c.sha)
    }
}

#[async_trait]
impl Publisher for GithubPublisher {
    async fn publish(&self, content: &[u8]) -> Result<()> {
        let sha = self.existing_sha().await;
        let mut payload = json!({
            "message": format!("Add/Update {} automatically via harvester", self.remote_path),
            "content": BASE64.encode(content),
            "branch": self.login.branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = json!(sha);
        }

        let resp = self
            .client
            .put(self.contents_url())
            .bearer_auth(&self.login.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(&payload)
            .send()
            .await
            .context("applist upload request failed")?
            .error_for_status()
            .context("applist upload rejected")?;

        let commit_sha = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("commit")
                    .and_then(|c| c.get("sha"))
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "unknown".into());
        info!(
            repo = %format!("{}/{}", self.login.owner, self.login.repo),
            branch = %self.login.branch,
            commit = %commit_sha,
            "applist uploaded"
        );
        Ok(())
    }
}
