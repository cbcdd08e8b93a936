//! Durable applist: the ordered set of confirmed, enriched app records.
//!
//! The on-disk artifact is a versioned JSON document so parsing stays total;
//! existing entries are never rewritten or dropped, only appended to via
//! [`ResultStore::merge`]. A successful save also hands the serialized bytes
//! to the configured publisher, whose failure is logged and never rolls the
//! local write back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::publish::Publisher;

const APPLIST_FORMAT_VERSION: u32 = 1;

/// One confirmed app. `install_dir` stays empty until enrichment resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub appid: u32,
    pub name: String,
    #[serde(default)]
    pub install_dir: String,
}

/// Insertion-ordered view of the applist, keyed by app ID.
pub type ResultSet = IndexMap<u32, AppRecord>;

#[derive(Debug, Serialize, Deserialize)]
struct AppListFile {
    version: u32,
    generated_at: String,
    apps: Vec<AppRecord>,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the applist, preserving file order. Absent or unparsable files
    /// (including unknown format versions) load as an empty set with a
    /// warning; previously confirmed results are only ever lost to explicit
    /// external deletion, never to a read error here.
    pub fn load(&self) -> ResultSet {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "applist unreadable; starting empty");
                }
                return ResultSet::new();
            }
        };
        let parsed: AppListFile = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "applist unparsable; starting empty");
                return ResultSet::new();
            }
        };
        if parsed.version != APPLIST_FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                version = parsed.version,
                expected = APPLIST_FORMAT_VERSION,
                "unknown applist format version; starting empty"
            );
            return ResultSet::new();
        }
        let mut records = ResultSet::with_capacity(parsed.apps.len());
        for record in parsed.apps {
            if records.contains_key(&record.appid) {
                warn!(appid = record.appid, "duplicate appid in applist file; keeping first");
                continue;
            }
            records.insert(record.appid, record);
        }
        records
    }

    /// Fold `incoming` into `existing`: records whose appid is already
    /// present are dropped (first-seen wins), new records append in the order
    /// supplied. Returns how many were added. Merging the same batch twice is
    /// a no-op the second time.
    pub fn merge(existing: &mut ResultSet, incoming: Vec<AppRecord>) -> usize {
        let mut added = 0;
        for record in incoming {
            if existing.contains_key(&record.appid) {
                continue;
            }
            existing.insert(record.appid, record);
            added += 1;
        }
        added
    }

    /// Write the full set to disk (temp file + rename), then fire the publish
    /// hook with the serialized bytes. Publish failure is logged, not
    /// propagated: the local artifact is already durable at that point.
    pub async fn save(
        &self,
        records: &ResultSet,
        publisher: Option<&dyn Publisher>,
    ) -> Result<()> {
        let doc = AppListFile {
            version: APPLIST_FORMAT_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            apps: records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).context("failed to serialize applist")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .with_context(|| format!("failed to write applist {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace applist {}", self.path.display()))?;
        info!(path = %self.path.display(), apps = records.len(), "applist saved");

        if let Some(publisher) = publisher {
            if let Err(err) = publisher.publish(&bytes).await {
                warn!(error = %err, "applist upload failed; local save kept");
            }
        }
        Ok(())
    }
}
