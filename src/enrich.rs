//! Bounded-concurrency enrichment of candidate batches.
//!
//! A fixed pool of workers drains a shared FIFO queue; each worker owns an
//! independent metadata session. Enrichment is best-effort per item and never
//! batch-fatal: every input entry comes back as exactly one record, falling
//! back to the supplied name with an empty install dir when the remote cannot
//! be made to answer.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::EnrichSettings;
use crate::steam::metadata::{
    install_dir_from_kv, install_dir_from_map, name_from_map, MetadataSession, MetadataSource,
    ProductInfo,
};
use crate::steam::CandidateEntry;
use crate::store::AppRecord;

// Workers poll an emptied queue briefly before exiting instead of blocking
// forever on it.
const IDLE_POLL: Duration = Duration::from_millis(50);
const IDLE_TIMEOUT: Duration = Duration::from_millis(250);

fn fallback_record(entry: &CandidateEntry) -> AppRecord {
    let name = if entry.name.is_empty() {
        entry.appid.to_string()
    } else {
        entry.name.clone()
    };
    AppRecord {
        appid: entry.appid,
        name,
        install_dir: String::new(),
    }
}

/// Enrich a batch of candidates. Output order follows worker completion, not
/// input order; identifiers map 1:1 to the input.
pub async fn enrich_batch(
    source: Arc<dyn MetadataSource>,
    batch: Vec<CandidateEntry>,
    settings: &EnrichSettings,
) -> Vec<AppRecord> {
    if batch.is_empty() {
        return Vec::new();
    }
    let expected = batch.clone();
    let queue = Arc::new(Mutex::new(VecDeque::from(batch)));
    let workers = settings.concurrency.min(expected.len()).max(1);
    info!(
        batch = expected.len(),
        workers, "enrichment batch starting"
    );

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let queue = queue.clone();
        let source = source.clone();
        let settings = settings.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, queue, source, settings).await
        }));
    }

    let mut records: Vec<AppRecord> = Vec::with_capacity(expected.len());
    for joined in join_all(handles).await {
        match joined {
            Ok(mut worker_records) => records.append(&mut worker_records),
            Err(err) => warn!(error = %err, "enrichment worker aborted"),
        }
    }

    // No-loss guarantee: anything still queued (all sessions failed to
    // connect) or lost to an aborted worker becomes a fallback record.
    let seen: HashSet<u32> = records.iter().map(|r| r.appid).collect();
    for entry in &expected {
        if !seen.contains(&entry.appid) {
            records.push(fallback_record(entry));
        }
    }
    records
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<CandidateEntry>>>,
    source: Arc<dyn MetadataSource>,
    settings: EnrichSettings,
) -> Vec<AppRecord> {
    // The session is owned by this worker alone and released by drop on every
    // exit path.
    let mut session = match source.connect().await {
        Ok(session) => session,
        Err(err) => {
            warn!(worker_id, error = %err, "metadata session connect failed; worker exiting");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    let mut idle = Duration::ZERO;
    loop {
        let entry = queue.lock().await.pop_front();
        match entry {
            Some(entry) => {
                idle = Duration::ZERO;
                let record = enrich_one(session.as_mut(), &entry, &settings).await;
                records.push(record);
            }
            None => {
                if idle >= IDLE_TIMEOUT {
                    debug!(worker_id, produced = records.len(), "worker idle; exiting");
                    return records;
                }
                sleep(IDLE_POLL).await;
                idle += IDLE_POLL;
            }
        }
    }
}

/// Fetch one entry with bounded retries. Transient failures (timeouts, 5xx)
/// back off linearly (`attempt * retry_base_delay`); anything permanent falls
/// straight through to the fallback record without burning retry budget.
async fn enrich_one(
    session: &mut dyn MetadataSession,
    entry: &CandidateEntry,
    settings: &EnrichSettings,
) -> AppRecord {
    let mut attempt: u32 = 0;
    loop {
        match session
            .product_info(entry.appid, settings.per_item_timeout)
            .await
        {
            Ok(info) => return resolve(entry, info),
            Err(err) if err.is_transient() => {
                if attempt >= settings.max_retries {
                    warn!(appid = entry.appid, error = %err, "metadata fetch exhausted retries");
                    return fallback_record(entry);
                }
                attempt += 1;
                debug!(
                    appid = entry.appid,
                    attempt,
                    max = settings.max_retries,
                    error = %err,
                    "metadata fetch retrying"
                );
                sleep(settings.retry_base_delay * attempt).await;
            }
            Err(err) => {
                debug!(appid = entry.appid, error = %err, "metadata fetch failed permanently");
                return fallback_record(entry);
            }
        }
    }
}

fn resolve(entry: &CandidateEntry, info: ProductInfo) -> AppRecord {
    match info {
        ProductInfo::Structured(map) => {
            let name = if entry.name.is_empty() {
                name_from_map(&map).unwrap_or_else(|| entry.appid.to_string())
            } else {
                entry.name.clone()
            };
            AppRecord {
                appid: entry.appid,
                name,
                install_dir: install_dir_from_map(&map).unwrap_or_default(),
            }
        }
        ProductInfo::KeyValueText(text) => AppRecord {
            appid: entry.appid,
            name: if entry.name.is_empty() {
                entry.appid.to_string()
            } else {
                entry.name.clone()
            },
            install_dir: install_dir_from_kv(&text).unwrap_or_default(),
        },
        ProductInfo::Unusable => fallback_record(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::metadata::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    enum Behavior {
        InstallDir(&'static str),
        KvText(&'static str),
        AlwaysTimeout,
        Malformed,
        Unusable,
    }

    struct ScriptedSource {
        behaviors: HashMap<u32, Behavior>,
        attempts: Arc<StdMutex<HashMap<u32, u32>>>,
        refuse_connect: bool,
    }

    impl ScriptedSource {
        fn new(behaviors: Vec<(u32, Behavior)>) -> Self {
            Self {
                behaviors: behaviors.into_iter().collect(),
                attempts: Arc::new(StdMutex::new(HashMap::new())),
                refuse_connect: false,
            }
        }

        fn attempts_for(&self, appid: u32) -> u32 {
            *self.attempts.lock().unwrap().get(&appid).unwrap_or(&0)
        }
    }

    struct ScriptedSession {
        behaviors: HashMap<u32, Behavior>,
        attempts: Arc<StdMutex<HashMap<u32, u32>>>,
    }

    #[async_trait]
    impl MetadataSource for ScriptedSource {
        async fn connect(&self) -> Result<Box<dyn MetadataSession>, FetchError> {
            if self.refuse_connect {
                return Err(FetchError::Transient("connection refused".into()));
            }
            Ok(Box::new(ScriptedSession {
                behaviors: self.behaviors.clone(),
                attempts: self.attempts.clone(),
            }))
        }
    }

    #[async_trait]
    impl MetadataSession for ScriptedSession {
        async fn product_info(
            &mut self,
            appid: u32,
            _timeout: Duration,
        ) -> Result<ProductInfo, FetchError> {
            *self.attempts.lock().unwrap().entry(appid).or_insert(0) += 1;
            match self.behaviors.get(&appid) {
                Some(Behavior::InstallDir(dir)) => {
                    let map = serde_json::from_str(&format!(
                        r#"{{"config": {{"installdir": "{dir}"}}}}"#
                    ))
                    .unwrap();
                    Ok(ProductInfo::Structured(map))
                }
                Some(Behavior::KvText(text)) => Ok(ProductInfo::KeyValueText(text.to_string())),
                Some(Behavior::AlwaysTimeout) => {
                    Err(FetchError::Transient("timeout after 10s".into()))
                }
                Some(Behavior::Malformed) => {
                    Err(FetchError::Permanent("unexpected shape".into()))
                }
                Some(Behavior::Unusable) => Ok(ProductInfo::Unusable),
                None => Err(FetchError::Permanent("unknown appid".into())),
            }
        }
    }

    fn entry(appid: u32, name: &str) -> CandidateEntry {
        CandidateEntry {
            appid,
            name: name.into(),
        }
    }

    fn fast_settings() -> EnrichSettings {
        EnrichSettings {
            concurrency: 3,
            per_item_timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn timed_out_entry_falls_back_without_dropping() {
        let source = Arc::new(ScriptedSource::new(vec![
            (620, Behavior::InstallDir("Portal 2")),
            (570, Behavior::AlwaysTimeout),
            (400, Behavior::KvText("\"installdir\" \"Portal\"")),
        ]));
        let batch = vec![entry(620, "Portal 2"), entry(570, "Dota 2"), entry(400, "Portal")];
        let records = enrich_batch(source.clone(), batch, &fast_settings()).await;

        assert_eq!(records.len(), 3);
        let by_id: HashMap<u32, &AppRecord> = records.iter().map(|r| (r.appid, r)).collect();
        assert_eq!(by_id[&620].install_dir, "Portal 2");
        assert_eq!(by_id[&400].install_dir, "Portal");
        // The timed-out one kept its supplied name and stayed unresolved.
        assert_eq!(by_id[&570].name, "Dota 2");
        assert_eq!(by_id[&570].install_dir, "");
        // First try plus max_retries more.
        assert_eq!(source.attempts_for(570), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_consume_retries() {
        let source = Arc::new(ScriptedSource::new(vec![(10, Behavior::Malformed)]));
        let records =
            enrich_batch(source.clone(), vec![entry(10, "Counter-Strike")], &fast_settings())
                .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Counter-Strike");
        assert_eq!(records[0].install_dir, "");
        assert_eq!(source.attempts_for(10), 1);
    }

    #[tokio::test]
    async fn unusable_payload_falls_back() {
        let source = Arc::new(ScriptedSource::new(vec![(30, Behavior::Unusable)]));
        let records = enrich_batch(source, vec![entry(30, "Day of Defeat")], &fast_settings()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].install_dir, "");
    }

    #[tokio::test]
    async fn connect_failure_still_returns_every_entry() {
        let mut source = ScriptedSource::new(vec![(1, Behavior::InstallDir("one"))]);
        source.refuse_connect = true;
        let batch = vec![entry(1, "One"), entry(2, "Two")];
        let records = enrich_batch(Arc::new(source), batch, &fast_settings()).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.install_dir.is_empty()));
    }

    #[tokio::test]
    async fn large_batch_maps_one_to_one() {
        let behaviors: Vec<(u32, Behavior)> =
            (0..50).map(|i| (i, Behavior::InstallDir("dir"))).collect();
        let source = Arc::new(ScriptedSource::new(behaviors));
        let batch: Vec<CandidateEntry> =
            (0..50).map(|i| entry(i, &format!("App {i}"))).collect();
        let records = enrich_batch(source, batch, &fast_settings()).await;
        assert_eq!(records.len(), 50);
        let ids: HashSet<u32> = records.iter().map(|r| r.appid).collect();
        assert_eq!(ids.len(), 50);
    }

    #[tokio::test]
    async fn empty_name_takes_metadata_name() {
        let behaviors = vec![(620, Behavior::InstallDir("Portal 2"))];
        let source = Arc::new(ScriptedSource::new(behaviors));
        let records = enrich_batch(source, vec![entry(620, "")], &fast_settings()).await;
        // Scripted structured payload has no name field, so the appid string
        // stands in rather than an empty name.
        assert_eq!(records[0].name, "620");
    }
}
