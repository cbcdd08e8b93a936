//! Brute-force range scanner: one ID at a time, strictly sequential, with a
//! checkpoint write after every step.
//!
//! The sweep is intentionally endless in spirit: new IDs keep appearing in
//! the remote space, so completing a pass wraps the cursor to 0 rather than
//! terminating. IDs already present in the result set are treated as
//! confirmed without re-probing; exclusion verdicts, by contrast, are
//! re-derived every pass because the upstream page structure reports them
//! inconsistently.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::ScanSettings;
use crate::pipeline::Shutdown;
use crate::steam::storefront::{ProbeOutcome, StorefrontProbe};
use crate::steam::CandidateEntry;
use crate::store::ResultSet;

#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub candidates: Vec<CandidateEntry>,
    /// True when this batch closed out a full sweep of the range.
    pub pass_complete: bool,
}

pub struct RangeScanner<'a> {
    probe: &'a dyn StorefrontProbe,
    checkpoint: &'a CheckpointStore,
    end_appid: u32,
    batch_size: usize,
    current: u32,
}

impl<'a> RangeScanner<'a> {
    /// Resume at the checkpointed ID (re-examining it: re-work after a crash
    /// is bounded to that one unit) or at 0 when there is none.
    pub fn new(
        probe: &'a dyn StorefrontProbe,
        checkpoint: &'a CheckpointStore,
        settings: &ScanSettings,
    ) -> Self {
        let current = match checkpoint.load() {
            Some(last) if last <= settings.end_appid => last,
            Some(last) => {
                warn!(last, end = settings.end_appid, "checkpoint beyond configured range; restarting at 0");
                0
            }
            None => 0,
        };
        if current > 0 {
            info!(resume_at = current, "resuming scan from checkpoint");
        }
        Self {
            probe,
            checkpoint,
            end_appid: settings.end_appid,
            batch_size: settings.batch_size,
            current,
        }
    }

    pub fn cursor(&self) -> u32 {
        self.current
    }

    /// Scan forward until a batch of candidates has accumulated, the range is
    /// exhausted, or shutdown is requested. The checkpoint is saved after
    /// every examined ID, and once more with the resume cursor on shutdown.
    pub async fn next_batch(
        &mut self,
        known: &ResultSet,
        shutdown: &Shutdown,
    ) -> Result<ScanBatch> {
        let mut candidates = Vec::new();
        loop {
            if shutdown.is_set() {
                self.checkpoint.save(self.current)?;
                info!(cursor = self.current, "scan interrupted; cursor persisted");
                return Ok(ScanBatch {
                    candidates,
                    pass_complete: false,
                });
            }

            let appid = self.current;
            if known.contains_key(&appid) {
                debug!(appid, "already confirmed; skipping probe");
            } else {
                match self.probe.probe(appid).await {
                    ProbeOutcome::Game { name } => {
                        info!(appid, "valid app found");
                        candidates.push(CandidateEntry {
                            appid,
                            name: name.unwrap_or_default(),
                        });
                    }
                    ProbeOutcome::Excluded => {
                        debug!(appid, "excluded category (dlc/soundtrack)");
                    }
                    ProbeOutcome::Missing => {}
                    ProbeOutcome::Unreachable => {
                        // Treated as missing for candidacy this pass; nothing
                        // is cached, so a later pass probes the ID again.
                        warn!(appid, "storefront unreachable; skipping id this pass");
                    }
                }
            }
            self.checkpoint.save(appid)?;

            if appid >= self.end_appid {
                info!(end = self.end_appid, "reached end of range; next sweep restarts at 0");
                self.current = 0;
                return Ok(ScanBatch {
                    candidates,
                    pass_complete: true,
                });
            }
            self.current = appid + 1;

            if candidates.len() >= self.batch_size {
                return Ok(ScanBatch {
                    candidates,
                    pass_complete: false,
                });
            }
        }
    }
}
