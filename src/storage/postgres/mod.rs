//! PostgreSQL storage engine.
//!
//! The catalog lives in its own schema (`sb` by default). Every base gets a
//! schema named after it, holding the system tables created by the tenant
//! migrations and one table per user collection, created on first write:
//!
//! ```sql
//! CREATE TABLE "<base>"."<collection>" (
//!     id TEXT PRIMARY KEY,
//!     account_id TEXT NOT NULL DEFAULT '',
//!     data JSONB NOT NULL,
//!     created TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sea_query::{Alias, IntoTableRef, TableRef};
use sqlx::PgPool;
use tracing::info;

use super::helpers::validate_base_name;
use crate::interfaces::{ChangePublisher, Persister, Result, TenantCatalog};
use crate::migration::{run_migrations, MigrationReport, MigrationSet};

mod catalog;
mod documents;
mod files;
pub mod filter;
mod functions;
mod migration;
mod tasks;

pub use migration::PostgresMigrationTarget;

/// PostgreSQL implementation of the Persister contract.
pub struct PostgresPersister {
    pool: PgPool,
    catalog_schema: String,
    catalog_migrations: MigrationSet,
    tenant_migrations: MigrationSet,
    publisher: Arc<dyn ChangePublisher>,
}

impl PostgresPersister {
    /// Create a persister over an open pool.
    pub fn new(
        pool: PgPool,
        catalog_schema: &str,
        publisher: Arc<dyn ChangePublisher>,
    ) -> Result<Self> {
        validate_base_name(catalog_schema)?;
        Ok(Self {
            pool,
            catalog_schema: catalog_schema.to_string(),
            catalog_migrations: MigrationSet::catalog(),
            tenant_migrations: MigrationSet::tenant(),
            publisher,
        })
    }

    /// Replace the embedded migration units.
    pub fn with_migrations(mut self, catalog: MigrationSet, tenant: MigrationSet) -> Self {
        self.catalog_migrations = catalog;
        self.tenant_migrations = tenant;
        self
    }

    /// Get a reference to the pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema of `base` when missing and bring it up to date.
    pub async fn migrate_base(&self, base: &str) -> Result<MigrationReport> {
        validate_base_name(base)?;
        let target = PostgresMigrationTarget::new(self.pool.clone(), base);
        run_migrations(&target, &self.tenant_migrations).await
    }

    /// Bring the catalog schema up to date.
    pub async fn migrate_catalog(&self) -> Result<MigrationReport> {
        let target = PostgresMigrationTarget::new(self.pool.clone(), &self.catalog_schema);
        run_migrations(&target, &self.catalog_migrations).await
    }

    fn catalog_table<T: sea_query::Iden + 'static>(&self, table: T) -> TableRef {
        tenant_table(&self.catalog_schema, table)
    }
}

/// Schema-qualified reference to a table inside a base.
pub(crate) fn tenant_table<T: sea_query::Iden + 'static>(base: &str, table: T) -> TableRef {
    (Alias::new(base), table).into_table_ref()
}

/// Quote an identifier for inclusion in raw SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.into_owned())
}

/// Duplicate key (23505).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    sqlstate(e).as_deref() == Some("23505")
}

/// Undefined table (42P01) or schema (3F000).
pub(crate) fn is_missing_relation(e: &sqlx::Error) -> bool {
    matches!(sqlstate(e).as_deref(), Some("42P01") | Some("3F000"))
}

/// Lost a race creating a relation that another session created
/// (23505 on the catalog, 42P07 relation or 42P06 schema exists).
pub(crate) fn is_concurrent_create(e: &sqlx::Error) -> bool {
    matches!(
        sqlstate(e).as_deref(),
        Some("23505") | Some("42P07") | Some("42P06")
    )
}

#[async_trait]
impl Persister for PostgresPersister {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<Vec<MigrationReport>> {
        let mut reports = vec![self.migrate_catalog().await?];
        for base in self.list_databases().await? {
            reports.push(self.migrate_base(&base.name).await?);
        }
        info!(partitions = reports.len(), "PostgreSQL schemas up to date");
        Ok(reports)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("acme"), "\"acme\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_tenant_table_is_schema_qualified() {
        use sea_query::{PostgresQueryBuilder, Query};

        use crate::storage::schema::Tasks;

        let sql = Query::select()
            .column(Tasks::Id)
            .from(tenant_table("acme", Tasks::Table))
            .to_string(PostgresQueryBuilder);
        assert_eq!(sql, r#"SELECT "id" FROM "acme"."sb_tasks""#);
    }
}
