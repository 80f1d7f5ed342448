//! tenantstore-migrate: bring every partition up to date.
//!
//! Migrates the catalog, then every active base, and exits non-zero on the
//! first failure. Safe to run from several replicas at once.
//!
//! ## Configuration
//! - TENANTSTORE_CONFIG: Path to the config file (default: config.yaml)
//! - TENANTSTORE__STORAGE__TYPE: `postgres`, `mongodb` or `memory`
//! - TENANTSTORE_LOG: Log filter (default: info)
//!
//! An explicit config path may also be given as the first argument.

use std::sync::Arc;

use tracing::{error, info};

use tenantstore::config::Config;
use tenantstore::publisher::NoopPublisher;
use tenantstore::storage::init_storage;
use tenantstore::utils::bootstrap::{connect_with_retry, init_tracing};

const CONNECT_RETRIES: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    let storage_type = config.storage.storage_type.to_string();

    let persister = connect_with_retry(&storage_type, CONNECT_RETRIES, || {
        init_storage(&config.storage, Arc::new(NoopPublisher))
    })
    .await?;

    let outcome = persister.migrate().await;
    persister.close().await;

    match outcome {
        Ok(reports) => {
            for report in &reports {
                info!(
                    partition = %report.partition,
                    from = report.from,
                    to = report.to,
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "Partition migrated"
                );
            }
            info!(partitions = reports.len(), "Migration complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Migration failed");
            std::process::exit(1);
        }
    }
}
