//! Durable scan cursor.
//!
//! The checkpoint file holds a single decimal app ID: the last identifier the
//! scanner examined. It is rewritten after every scanned ID so that a crash
//! or interrupt loses at most one unit of work, and deleted once a full pass
//! has been persisted so the next pass starts clean at 0.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last scanned app ID, or None when there is no usable checkpoint.
    ///
    /// Missing file and garbage content both mean "start from scratch"; this
    /// never surfaces an error to the caller.
    pub fn load(&self) -> Option<u32> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "checkpoint unreadable; starting from 0");
                }
                return None;
            }
        };
        match raw.trim().parse::<u32>() {
            Ok(appid) => Some(appid),
            Err(_) => {
                warn!(path = %self.path.display(), "checkpoint content is not an app id; starting from 0");
                None
            }
        }
    }

    /// Overwrite the cursor. Writes to a sibling temp file and renames so a
    /// crash mid-write cannot leave a truncated checkpoint behind.
    pub fn save(&self, appid: u32) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, appid.to_string())
            .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the cursor entirely. Called after a full pass has been
    /// persisted; a missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to clear checkpoint {}", self.path.display())),
        }
    }
}
