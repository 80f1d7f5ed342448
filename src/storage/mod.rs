//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::{ChangePublisher, Persister, Result};

pub mod helpers;
pub mod mock;

#[cfg(feature = "postgres")]
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use mock::MockPersister;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPersister;

#[cfg(feature = "mongodb")]
pub use mongodb::MongoPersister;

/// Initialize storage based on configuration.
///
/// The engine is chosen here, once; everything downstream holds the
/// returned `Arc<dyn Persister>`. Schemas are not migrated here, call
/// [`Persister::migrate`] before serving requests.
pub async fn init_storage(
    config: &StorageConfig,
    publisher: Arc<dyn ChangePublisher>,
) -> Result<Arc<dyn Persister>> {
    info!(storage = %config.storage_type, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MockPersister::new(publisher))),
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.postgres.max_connections)
                .connect(&config.postgres.uri)
                .await?;
            let persister =
                PostgresPersister::new(pool, &config.postgres.catalog_schema, publisher)?;
            Ok(Arc::new(persister))
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => {
            tracing::error!("PostgreSQL storage requested but 'postgres' feature is not enabled");
            Err(crate::interfaces::StorageError::Backend(
                "postgres feature not enabled".to_string(),
            ))
        }
        #[cfg(feature = "mongodb")]
        StorageType::Mongodb => {
            let client = ::mongodb::Client::with_uri_str(&config.mongodb.uri).await?;
            let persister =
                MongoPersister::new(client, &config.mongodb.catalog_database, publisher).await?;
            Ok(Arc::new(persister))
        }
        #[cfg(not(feature = "mongodb"))]
        StorageType::Mongodb => {
            tracing::error!("MongoDB storage requested but 'mongodb' feature is not enabled");
            Err(crate::interfaces::StorageError::Backend(
                "mongodb feature not enabled".to_string(),
            ))
        }
    }
}
