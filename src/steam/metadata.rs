//! Per-app metadata service: resolves an app's display name and
//! install-directory string.
//!
//! The remote answers in one of two shapes (a structured per-app JSON map, or
//! a raw key-value text blob) and sometimes in neither. The shape is decided
//! once at this boundary and modeled as [`ProductInfo`], so downstream code
//! matches exhaustively instead of re-sniffing.
//!
//! The service's client sessions are not safe for concurrent use, so each
//! enrichment worker connects its own [`MetadataSession`]; sessions are never
//! shared across workers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::HarvesterConfig;

/// Metadata response, decided once at the fetch boundary.
#[derive(Debug, Clone)]
pub enum ProductInfo {
    /// Structured per-app map (the `data` object of the details payload).
    Structured(Map<String, Value>),
    /// Raw key-value text blob carrying an `installdir` field somewhere.
    KeyValueText(String),
    /// Present but not in any shape we can use.
    Unusable,
}

/// Classification of a failed fetch. Transient failures are worth retrying;
/// permanent ones (malformed payloads, rejected requests) are not.
#[derive(Debug, Clone)]
pub enum FetchError {
    Transient(String),
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "transient: {msg}"),
            FetchError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// One logical session against the metadata service. `&mut self` because the
/// underlying connection state is single-request.
#[async_trait]
pub trait MetadataSession: Send {
    async fn product_info(
        &mut self,
        appid: u32,
        timeout: Duration,
    ) -> Result<ProductInfo, FetchError>;
}

/// Session factory; each worker calls `connect` once and owns the result.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MetadataSession>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    success: bool,
    data: Option<Map<String, Value>>,
}

/// HTTP-backed metadata service.
#[derive(Debug, Clone)]
pub struct AppInfoService {
    base_url: String,
    cookie_header: String,
    user_agent: String,
}

impl AppInfoService {
    pub fn new(cfg: &HarvesterConfig) -> Self {
        Self {
            base_url: cfg.appinfo_base_url.clone(),
            cookie_header: cfg.store_cookie_header(),
            user_agent: cfg.user_agent.clone(),
        }
    }
}

#[async_trait]
impl MetadataSource for AppInfoService {
    async fn connect(&self) -> Result<Box<dyn MetadataSession>, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            header::HeaderValue::from_str(&self.cookie_header)
                .map_err(|e| FetchError::Permanent(format!("bad cookie header: {e}")))?,
        );
        // A fresh Client per session keeps connection state private to the
        // owning worker.
        let client = Client::builder()
            .user_agent(self.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Transient(format!("client build failed: {e}")))?;
        Ok(Box::new(AppInfoSession {
            client,
            base_url: self.base_url.clone(),
        }))
    }
}

pub struct AppInfoSession {
    client: Client,
    base_url: String,
}

#[async_trait]
impl MetadataSession for AppInfoSession {
    async fn product_info(
        &mut self,
        appid: u32,
        timeout: Duration,
    ) -> Result<ProductInfo, FetchError> {
        let url = format!("{}/api/appdetails", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("appids", appid.to_string())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Transient(format!("timeout after {timeout:?}"))
                } else {
                    FetchError::Transient(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("status {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("body read failed: {e}")))?;
        Ok(classify_body(appid, &body))
    }
}

/// Decide the response shape exactly once.
fn classify_body(appid: u32, body: &str) -> ProductInfo {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let key = appid.to_string();
        let entry = value.get(key.as_str());
        let wrapper = entry
            .cloned()
            .and_then(|v| serde_json::from_value::<AppDetailsWrapper>(v).ok());
        return match wrapper {
            Some(AppDetailsWrapper {
                success: true,
                data: Some(map),
            }) => ProductInfo::Structured(map),
            _ => ProductInfo::Unusable,
        };
    }
    // Not JSON; maybe the VDF-ish product info dump.
    if body.contains("\"installdir\"") || body.contains("\"appinfo\"") {
        ProductInfo::KeyValueText(body.to_string())
    } else {
        ProductInfo::Unusable
    }
}

/// Install dir out of the structured map: `config.installdir` first (the
/// authoritative spot), then `common.installdir`, then a bare top-level key.
pub fn install_dir_from_map(map: &Map<String, Value>) -> Option<String> {
    map.get("config")
        .and_then(|c| c.get("installdir"))
        .and_then(|v| v.as_str())
        .or_else(|| {
            map.get("common")
                .and_then(|c| c.get("installdir"))
                .and_then(|v| v.as_str())
        })
        .or_else(|| map.get("installdir").and_then(|v| v.as_str()))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Display name out of the structured map.
pub fn name_from_map(map: &Map<String, Value>) -> Option<String> {
    map.get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Scan a key-value text blob for the first `"installdir" "<value>"` pair.
/// Tolerates tabs/newlines between the key and value tokens.
pub fn install_dir_from_kv(text: &str) -> Option<String> {
    let mut tokens = QuotedTokens::new(text);
    while let Some(token) = tokens.next() {
        if token == "installdir" {
            return tokens.next().filter(|v| !v.is_empty());
        }
    }
    None
}

/// Iterator over double-quoted tokens, honoring backslash escapes.
struct QuotedTokens<'a> {
    rest: std::str::Chars<'a>,
}

impl<'a> QuotedTokens<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text.chars() }
    }
}

impl<'a> Iterator for QuotedTokens<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        // Skip to the opening quote.
        loop {
            match self.rest.next()? {
                '"' => break,
                _ => continue,
            }
        }
        let mut token = String::new();
        loop {
            match self.rest.next()? {
                '\\' => {
                    if let Some(escaped) = self.rest.next() {
                        token.push(escaped);
                    }
                }
                '"' => return Some(token),
                c => token.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_structured_details() {
        let body = r#"{"620": {"success": true, "data": {"name": "Portal 2", "config": {"installdir": "Portal 2"}}}}"#;
        match classify_body(620, body) {
            ProductInfo::Structured(map) => {
                assert_eq!(name_from_map(&map).as_deref(), Some("Portal 2"));
                assert_eq!(install_dir_from_map(&map).as_deref(), Some("Portal 2"));
            }
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn failed_lookup_is_unusable() {
        let body = r#"{"999999": {"success": false}}"#;
        assert!(matches!(classify_body(999_999, body), ProductInfo::Unusable));
        // JSON for a different appid than asked is equally unusable.
        let body = r#"{"620": {"success": true, "data": {}}}"#;
        assert!(matches!(classify_body(570, body), ProductInfo::Unusable));
    }

    #[test]
    fn classifies_kv_text() {
        let body = "\"appinfo\"\n{\n\t\"common\"\n\t{\n\t\t\"installdir\"\t\t\"dota 2 beta\"\n\t}\n}\n";
        match classify_body(570, body) {
            ProductInfo::KeyValueText(text) => {
                assert_eq!(install_dir_from_kv(&text).as_deref(), Some("dota 2 beta"));
            }
            other => panic!("expected kv text, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_unusable() {
        assert!(matches!(
            classify_body(10, "<html>maintenance</html>"),
            ProductInfo::Unusable
        ));
    }

    #[test]
    fn kv_parser_handles_escapes_and_missing_key() {
        let text = r#""common" { "name" "A \"quoted\" game" "installdir" "Sub\\Dir" }"#;
        assert_eq!(install_dir_from_kv(text).as_deref(), Some(r"Sub\Dir"));
        assert_eq!(install_dir_from_kv("\"depots\" {}"), None);
    }

    #[test]
    fn structured_fallback_order() {
        let map: Map<String, Value> = serde_json::from_str(
            r#"{"common": {"installdir": "from-common"}, "name": "X"}"#,
        )
        .unwrap();
        assert_eq!(install_dir_from_map(&map).as_deref(), Some("from-common"));

        let map: Map<String, Value> =
            serde_json::from_str(r#"{"installdir": "bare"}"#).unwrap();
        assert_eq!(install_dir_from_map(&map).as_deref(), Some("bare"));

        let map: Map<String, Value> = serde_json::from_str(r#"{"name": "X"}"#).unwrap();
        assert_eq!(install_dir_from_map(&map), None);
    }
}
