//! MongoDB storage engine.
//!
//! The catalog lives in its own database (`sbsys` by default) with the
//! `accounts` and `bases` collections. Every base is a database named after
//! it; user collections and the `sb_*` system collections live inside it.
//! The document `id` is stored as `_id`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::Value;
use tracing::info;

use super::helpers::{validate_base_name, FUNCTIONS_COLLECTION};
use crate::interfaces::{ChangePublisher, Persister, Result, StorageError};
use crate::migration::MigrationReport;
use crate::model::{Document, ID_FIELD};

mod catalog;
mod documents;
pub mod filter;
mod system;

/// Catalog collection of customers.
pub(crate) const ACCOUNTS_COLLECTION: &str = "accounts";
/// Catalog collection of bases.
pub(crate) const BASES_COLLECTION: &str = "bases";
/// Primary key field of every MongoDB document.
pub(crate) const MONGO_ID: &str = "_id";

const DUPLICATE_KEY: i32 = 11000;
const TYPE_MISMATCH: i32 = 14;

/// MongoDB implementation of the Persister contract.
pub struct MongoPersister {
    client: Client,
    catalog: Database,
    publisher: Arc<dyn ChangePublisher>,
}

impl MongoPersister {
    /// Create a persister and ensure the catalog indexes exist.
    pub async fn new(
        client: Client,
        catalog_database: &str,
        publisher: Arc<dyn ChangePublisher>,
    ) -> Result<Self> {
        validate_base_name(catalog_database)?;
        let catalog = client.database(catalog_database);
        let store = Self {
            client,
            catalog,
            publisher,
        };
        store.init().await?;
        Ok(store)
    }

    /// Unique email and base name, lookup by Stripe id and owner.
    async fn init(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        let accounts = self.accounts();
        accounts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        accounts
            .create_index(IndexModel::builder().keys(doc! { "stripeId": 1 }).build())
            .await?;

        let bases = self.bases();
        bases
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        bases
            .create_index(IndexModel::builder().keys(doc! { "customerId": 1 }).build())
            .await?;

        Ok(())
    }

    /// Get the client, for sessions and admin commands.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn accounts(&self) -> Collection<bson::Document> {
        self.catalog.collection(ACCOUNTS_COLLECTION)
    }

    pub(crate) fn bases(&self) -> Collection<bson::Document> {
        self.catalog.collection(BASES_COLLECTION)
    }

    pub(crate) fn database(&self, base: &str) -> Database {
        self.client.database(base)
    }

    pub(crate) fn collection(&self, base: &str, name: &str) -> Collection<bson::Document> {
        self.client.database(base).collection(name)
    }

    /// Indexes every new base needs before its first write.
    pub(crate) async fn provision_base(&self, base: &str) -> Result<()> {
        self.collection(base, FUNCTIONS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        self.collection(base, FUNCTIONS_COLLECTION)
            .create_index(IndexModel::builder().keys(doc! { "triggerTopic": 1 }).build())
            .await?;
        Ok(())
    }
}

/// Server error code of a failed write, if any.
pub(crate) fn write_error_code(e: &mongodb::error::Error) -> Option<i32> {
    match *e.kind {
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref w)) => {
            Some(w.code)
        }
        mongodb::error::ErrorKind::Command(ref c) => Some(c.code),
        _ => None,
    }
}

pub(crate) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    write_error_code(e) == Some(DUPLICATE_KEY) || e.to_string().contains("E11000")
}

pub(crate) fn is_type_mismatch(e: &mongodb::error::Error) -> bool {
    write_error_code(e) == Some(TYPE_MISMATCH)
}

/// JSON document to BSON, with `id` stored as `_id`.
pub(crate) fn to_bson_document(doc: &Document) -> Result<bson::Document> {
    let mut converted = bson::Document::new();
    for (key, value) in doc {
        let value = to_bson(value)?;
        if key == ID_FIELD {
            converted.insert(MONGO_ID, value);
        } else {
            converted.insert(key.clone(), value);
        }
    }
    Ok(converted)
}

pub(crate) fn to_bson(value: &Value) -> Result<Bson> {
    bson::to_bson(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// BSON document to JSON, with `_id` exposed as `id`.
pub(crate) fn from_bson_document(doc: bson::Document) -> Result<Document> {
    let mut converted = Document::new();
    for (key, value) in doc {
        let key = if key == MONGO_ID {
            ID_FIELD.to_string()
        } else {
            key
        };
        converted.insert(key, value.into_relaxed_extjson());
    }
    Ok(converted)
}

pub(crate) fn to_bson_datetime(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

pub(crate) fn from_bson_datetime(at: bson::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or_default()
}

/// Optional timestamp field: absent or null means never.
pub(crate) fn optional_datetime(doc: &bson::Document, key: &str) -> Option<DateTime<Utc>> {
    doc.get_datetime(key).ok().map(|at| from_bson_datetime(*at))
}

pub(crate) fn bson_field_error(e: bson::document::ValueAccessError) -> StorageError {
    StorageError::Serialization(e.to_string())
}

#[async_trait]
impl Persister for MongoPersister {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<Vec<MigrationReport>> {
        info!("MongoDB needs no schema migrations");
        Ok(Vec::new())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
