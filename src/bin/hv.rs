use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use appid_harvester::checkpoint::CheckpointStore;
use appid_harvester::config::HarvesterConfig;
use appid_harvester::enrich::enrich_batch;
use appid_harvester::logging::init_tracing;
use appid_harvester::publish::{GithubPublisher, Publisher};
use appid_harvester::steam::metadata::AppInfoService;
use appid_harvester::steam::storefront::{StoreClient, StorefrontProbe};
use appid_harvester::steam::CandidateEntry;
use appid_harvester::store::ResultStore;
use appid_harvester::util::env::init_env;

#[derive(Parser, Debug)]
#[command(name = "hv", version, about = "Applist harvester admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Classify a single app id against the storefront
    Probe {
        appid: u32,
    },
    /// Re-enrich applist records whose install dir is still unresolved
    EnrichOnce {
        /// Maximum number of records to re-enrich
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the scan checkpoint, optionally clearing it
    Checkpoint {
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    /// Upload the current applist artifact to the configured repository
    Publish,
}

fn build_publisher(cfg: &HarvesterConfig) -> Result<Option<Arc<dyn Publisher>>> {
    match cfg.github.clone() {
        Some(login) => Ok(Some(Arc::new(GithubPublisher::new(cfg, login)?))),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("info")?;
    let cli = Cli::parse();

    let cfg = match HarvesterConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration preflight failed");
            std::process::exit(2);
        }
    };

    match cli.command {
        Commands::Probe { appid } => {
            let probe = StoreClient::new(&cfg)?;
            let outcome = probe.probe(appid).await;
            println!("app {appid}: {outcome}");
        }
        Commands::EnrichOnce { limit } => {
            let store = ResultStore::new(cfg.applist_path.clone());
            let mut records = store.load();
            let mut pending: Vec<CandidateEntry> = records
                .values()
                .filter(|r| r.install_dir.is_empty())
                .map(|r| CandidateEntry {
                    appid: r.appid,
                    name: r.name.clone(),
                })
                .collect();
            if let Some(limit) = limit {
                pending.truncate(limit);
            }
            if pending.is_empty() {
                println!("nothing to enrich; every record has an install dir");
                return Ok(());
            }
            println!("re-enriching {} records...", pending.len());

            let metadata = Arc::new(AppInfoService::new(&cfg));
            let enriched = enrich_batch(metadata, pending, &cfg.enrich).await;
            // Only fill in install dirs that were empty; names and ordering
            // of the applist never change here.
            let mut resolved = 0usize;
            for record in enriched {
                if record.install_dir.is_empty() {
                    continue;
                }
                if let Some(existing) = records.get_mut(&record.appid) {
                    if existing.install_dir.is_empty() {
                        existing.install_dir = record.install_dir;
                        resolved += 1;
                    }
                }
            }
            let publisher = build_publisher(&cfg)?;
            store.save(&records, publisher.as_deref()).await?;
            println!("resolved {resolved} install dirs");
        }
        Commands::Checkpoint { clear } => {
            let store = CheckpointStore::new(cfg.checkpoint_path.clone());
            match store.load() {
                Some(appid) => println!("checkpoint: {appid}"),
                None => println!("no checkpoint"),
            }
            if clear {
                store.clear()?;
                println!("checkpoint cleared");
            }
        }
        Commands::Publish => {
            let Some(login) = cfg.github.clone() else {
                println!("publishing disabled; set HARVEST_PUBLISH=1 and GitHub credentials");
                std::process::exit(2);
            };
            let bytes = std::fs::read(&cfg.applist_path).with_context(|| {
                format!("failed to read applist {}", cfg.applist_path.display())
            })?;
            GithubPublisher::new(&cfg, login)?.publish(&bytes).await?;
            println!("uploaded {}", cfg.applist_path.display());
        }
    }
    Ok(())
}
