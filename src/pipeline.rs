//! Pipeline driver: LOAD → SCAN_OR_LIST → ENRICH → MERGE → PERSIST →
//! IDLE_WAIT, repeated until shutdown.
//!
//! The driver is the sole owner of the in-memory result set and the
//! checkpoint; the worker pool only ever hands back owned records, so nothing
//! here needs a lock. Interruption at any point persists whatever has been
//! merged before the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{HarvestMode, HarvesterConfig};
use crate::enrich::enrich_batch;
use crate::publish::Publisher;
use crate::scanner::RangeScanner;
use crate::steam::listing::AppListing;
use crate::steam::metadata::MetadataSource;
use crate::steam::storefront::StorefrontProbe;
use crate::store::{ResultSet, ResultStore};

/// Cooperative shutdown signal shared between the ctrl-c handler and the
/// pipeline. Once triggered it stays set.
#[derive(Debug, Default)]
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve when the signal fires (immediately if it already has).
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Full pass finished and was persisted; checkpoint cleared.
    Completed { added: usize },
    /// Shutdown arrived mid-pass; partial progress persisted, checkpoint kept.
    Interrupted,
}

pub struct Pipeline {
    cfg: HarvesterConfig,
    checkpoint: CheckpointStore,
    store: ResultStore,
    probe: Arc<dyn StorefrontProbe>,
    listing: Arc<dyn AppListing>,
    metadata: Arc<dyn MetadataSource>,
    publisher: Option<Arc<dyn Publisher>>,
    shutdown: Arc<Shutdown>,
}

impl Pipeline {
    pub fn new(
        cfg: HarvesterConfig,
        probe: Arc<dyn StorefrontProbe>,
        listing: Arc<dyn AppListing>,
        metadata: Arc<dyn MetadataSource>,
        publisher: Option<Arc<dyn Publisher>>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let checkpoint = CheckpointStore::new(cfg.checkpoint_path.clone());
        let store = ResultStore::new(cfg.applist_path.clone());
        Self {
            cfg,
            checkpoint,
            store,
            probe,
            listing,
            metadata,
            publisher,
            shutdown,
        }
    }

    /// Run passes until interrupted, idling between them. Returns Ok on
    /// graceful shutdown with the final state persisted.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.run_cycle().await? {
                CycleOutcome::Interrupted => {
                    info!("graceful shutdown complete");
                    return Ok(());
                }
                CycleOutcome::Completed { added } => {
                    info!(added, "harvest pass complete");
                }
            }
            if self.idle_wait().await {
                info!("shutdown during idle wait");
                return Ok(());
            }
        }
    }

    /// One full LOAD→…→PERSIST cycle. Persists merged results even when the
    /// pass is cut short by shutdown; the checkpoint is only cleared after a
    /// genuinely complete pass.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let mut records = self.store.load();
        let before = records.len();
        info!(
            known = before,
            mode = %self.cfg.scan.mode,
            "harvest pass starting"
        );

        let interrupted = match self.cfg.scan.mode {
            HarvestMode::Brute => self.brute_pass(&mut records).await?,
            HarvestMode::Listing => self.listing_pass(&mut records).await?,
        };

        self.store
            .save(&records, self.publisher.as_deref())
            .await?;

        if interrupted {
            return Ok(CycleOutcome::Interrupted);
        }
        self.checkpoint.clear()?;
        Ok(CycleOutcome::Completed {
            added: records.len() - before,
        })
    }

    async fn brute_pass(&self, records: &mut ResultSet) -> Result<bool> {
        let mut scanner = RangeScanner::new(self.probe.as_ref(), &self.checkpoint, &self.cfg.scan);
        loop {
            let batch = scanner.next_batch(records, &self.shutdown).await?;
            if !batch.candidates.is_empty() {
                let enriched =
                    enrich_batch(self.metadata.clone(), batch.candidates, &self.cfg.enrich).await;
                let added = ResultStore::merge(records, enriched);
                info!(added, total = records.len(), "merged enrichment batch");
            }
            if batch.pass_complete {
                return Ok(false);
            }
            if self.shutdown.is_set() {
                return Ok(true);
            }
        }
    }

    async fn listing_pass(&self, records: &mut ResultSet) -> Result<bool> {
        let mut cursor: Option<u32> = None;
        loop {
            if self.shutdown.is_set() {
                return Ok(true);
            }
            let page = match self.listing.page(cursor).await {
                Ok(page) => page,
                Err(err) => {
                    // The pass retries wholesale after the idle wait; a dead
                    // listing endpoint must not wedge the daemon.
                    warn!(error = %err, "catalog listing failed; ending pass early");
                    return Ok(false);
                }
            };

            let fresh: Vec<_> = page
                .entries
                .into_iter()
                .filter(|e| !records.contains_key(&e.appid))
                .collect();
            info!(
                fresh = fresh.len(),
                has_more = page.has_more,
                "catalog listing page"
            );
            if !fresh.is_empty() {
                let enriched = enrich_batch(self.metadata.clone(), fresh, &self.cfg.enrich).await;
                let added = ResultStore::merge(records, enriched);
                info!(added, total = records.len(), "merged enrichment batch");
            }

            if !page.has_more {
                return Ok(false);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!("listing reported more pages without a cursor; ending pass");
                    return Ok(false);
                }
            }
        }
    }

    /// Returns true when shutdown fired during the wait.
    async fn idle_wait(&self) -> bool {
        info!(
            secs = self.cfg.idle_wait.as_secs(),
            "idling before next pass"
        );
        tokio::select! {
            _ = sleep(self.cfg.idle_wait) => self.shutdown.is_set(),
            _ = self.shutdown.wait() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnrichSettings, ScanSettings, SteamLogin};
    use crate::steam::listing::ListingPage;
    use crate::steam::metadata::{FetchError, MetadataSession, ProductInfo};
    use crate::steam::storefront::ProbeOutcome;
    use crate::steam::CandidateEntry;
    use crate::store::AppRecord;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir, mode: HarvestMode) -> HarvesterConfig {
        HarvesterConfig {
            steam: SteamLogin {
                sessionid: "s".into(),
                steam_login_secure: "l".into(),
            },
            github: None,
            store_base_url: "http://localhost".into(),
            api_base_url: "http://localhost".into(),
            appinfo_base_url: "http://localhost".into(),
            checkpoint_path: dir.path().join("cursor.txt"),
            applist_path: dir.path().join("applist.txt"),
            idle_wait: Duration::from_secs(1),
            http_timeout: Duration::from_secs(1),
            user_agent: "test".into(),
            scan: ScanSettings {
                mode,
                end_appid: 10,
                batch_size: 50,
                listing_page_size: 100,
            },
            enrich: EnrichSettings {
                concurrency: 2,
                per_item_timeout: Duration::from_secs(1),
                max_retries: 0,
                retry_base_delay: Duration::ZERO,
            },
        }
    }

    struct NeverProbe;

    #[async_trait]
    impl StorefrontProbe for NeverProbe {
        async fn probe(&self, _appid: u32) -> ProbeOutcome {
            ProbeOutcome::Missing
        }
    }

    struct PagedListing {
        pages: Vec<ListingPage>,
    }

    #[async_trait]
    impl AppListing for PagedListing {
        async fn page(&self, cursor: Option<u32>) -> Result<ListingPage> {
            let idx = match cursor {
                None => 0,
                Some(c) => self
                    .pages
                    .iter()
                    .position(|p| p.next_cursor == Some(c))
                    .map(|i| i + 1)
                    .unwrap_or(self.pages.len() - 1),
            };
            Ok(self.pages[idx].clone())
        }
    }

    struct DirSession;

    #[async_trait]
    impl MetadataSession for DirSession {
        async fn product_info(
            &mut self,
            appid: u32,
            _timeout: Duration,
        ) -> Result<ProductInfo, FetchError> {
            let map = serde_json::from_str(&format!(
                r#"{{"name": "App {appid}", "config": {{"installdir": "dir-{appid}"}}}}"#
            ))
            .map_err(|e| FetchError::Permanent(e.to_string()))?;
            Ok(ProductInfo::Structured(map))
        }
    }

    struct DirSource;

    #[async_trait]
    impl MetadataSource for DirSource {
        async fn connect(&self) -> Result<Box<dyn MetadataSession>, FetchError> {
            Ok(Box::new(DirSession))
        }
    }

    struct CountingPublisher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, _content: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn entry(appid: u32, name: &str) -> CandidateEntry {
        CandidateEntry {
            appid,
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn listing_cycle_merges_dedups_and_clears_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, HarvestMode::Listing);

        // Seed the applist with 42 and leave a stale-looking checkpoint.
        let store = ResultStore::new(&cfg.applist_path);
        let mut seed = ResultSet::new();
        ResultStore::merge(
            &mut seed,
            vec![AppRecord {
                appid: 42,
                name: "The Answer".into(),
                install_dir: "answer".into(),
            }],
        );
        store.save(&seed, None).await.unwrap();
        CheckpointStore::new(&cfg.checkpoint_path).save(99).unwrap();

        let listing = PagedListing {
            pages: vec![
                ListingPage {
                    entries: vec![entry(42, "Wrong Name"), entry(7, "Seven")],
                    has_more: true,
                    next_cursor: Some(42),
                },
                ListingPage {
                    entries: vec![entry(8, "Eight")],
                    has_more: false,
                    next_cursor: None,
                },
            ],
        };

        let shutdown = Arc::new(Shutdown::new());
        let pipeline = Pipeline::new(
            cfg.clone(),
            Arc::new(NeverProbe),
            Arc::new(listing),
            Arc::new(DirSource),
            None,
            shutdown,
        );

        let outcome = pipeline.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { added: 2 });

        let loaded = ResultStore::new(&cfg.applist_path).load();
        assert_eq!(loaded.len(), 3);
        // Pre-existing 42 untouched by the incoming duplicate.
        assert_eq!(loaded.get(&42).unwrap().name, "The Answer");
        assert_eq!(loaded.get(&7).unwrap().install_dir, "dir-7");
        assert_eq!(loaded.get(&8).unwrap().install_dir, "dir-8");
        // Completed pass removed the cursor.
        assert_eq!(CheckpointStore::new(&cfg.checkpoint_path).load(), None);
    }

    #[tokio::test]
    async fn interrupted_cycle_persists_and_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, HarvestMode::Brute);
        CheckpointStore::new(&cfg.checkpoint_path).save(5).unwrap();

        let shutdown = Arc::new(Shutdown::new());
        shutdown.trigger();
        let pipeline = Pipeline::new(
            cfg.clone(),
            Arc::new(NeverProbe),
            Arc::new(PagedListing { pages: vec![] }),
            Arc::new(DirSource),
            None,
            shutdown,
        );

        let outcome = pipeline.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Interrupted);
        // Applist persisted (empty but present) and cursor survived.
        assert!(cfg.applist_path.exists());
        assert_eq!(CheckpointStore::new(&cfg.checkpoint_path).load(), Some(5));
    }

    #[tokio::test]
    async fn publisher_fires_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir, HarvestMode::Listing);
        let listing = PagedListing {
            pages: vec![ListingPage {
                entries: vec![entry(1, "One")],
                has_more: false,
                next_cursor: None,
            }],
        };
        let publisher = Arc::new(CountingPublisher {
            calls: AtomicUsize::new(0),
        });

        let pipeline = Pipeline::new(
            cfg,
            Arc::new(NeverProbe),
            Arc::new(listing),
            Arc::new(DirSource),
            Some(publisher.clone()),
            Arc::new(Shutdown::new()),
        );
        pipeline.run_cycle().await.unwrap();
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    }
}
