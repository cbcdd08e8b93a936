use std::sync::Arc;

use anyhow::Result;
use appid_harvester::config::HarvesterConfig;
use appid_harvester::logging::init_tracing;
use appid_harvester::pipeline::{Pipeline, Shutdown};
use appid_harvester::publish::{GithubPublisher, Publisher};
use appid_harvester::steam::listing::SteamAppListing;
use appid_harvester::steam::metadata::AppInfoService;
use appid_harvester::steam::storefront::StoreClient;
use appid_harvester::util::env::init_env;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("info")?;

    // Configuration problems are fatal before any scan/enrich work starts.
    let cfg = match HarvesterConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration preflight failed");
            std::process::exit(2);
        }
    };

    let probe = Arc::new(StoreClient::new(&cfg)?);
    let listing = Arc::new(SteamAppListing::new(&cfg)?);
    let metadata = Arc::new(AppInfoService::new(&cfg));
    let publisher: Option<Arc<dyn Publisher>> = match cfg.github.clone() {
        Some(login) => Some(Arc::new(GithubPublisher::new(&cfg, login)?)),
        None => {
            info!("publishing disabled (HARVEST_PUBLISH=0)");
            None
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("ctrl-c received; draining workers and persisting progress");
                    shutdown.trigger();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install ctrl-c handler");
                }
            }
        });
    }

    info!(mode = %cfg.scan.mode, applist = %cfg.applist_path.display(), "appid harvester starting");
    Pipeline::new(cfg, probe, listing, metadata, publisher, shutdown)
        .run()
        .await?;
    Ok(())
}
