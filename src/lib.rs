//! appid-harvester: discovers valid app IDs in the storefront's sparse
//! numeric ID space and enriches them with install-directory metadata.
//!
//! The core is a resumable scan + enrich pipeline: a checkpointed sweep (or
//! catalog-listing walk) finds candidate IDs, a bounded worker pool resolves
//! per-app metadata best-effort, and the merged applist is persisted and
//! published without ever dropping previously confirmed entries.

pub mod checkpoint;
pub mod config;
pub mod enrich;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod scanner;
pub mod steam;
pub mod store;

pub mod util {
    pub mod env;
}
