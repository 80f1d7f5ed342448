//! Schema-scoped migration target.
//!
//! Every statement touching a partition's watermark runs inside a
//! transaction that first takes a transaction-level advisory lock keyed on
//! the schema, so concurrent migrators of the same partition serialize and
//! the loser observes the winner's watermark.

use async_trait::async_trait;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::{quote_ident, tenant_table};
use crate::interfaces::Result;
use crate::migration::{Migration, MigrationTarget};
use crate::storage::schema::Migrations;

/// Migrates one PostgreSQL schema: the catalog or a base.
pub struct PostgresMigrationTarget {
    pool: PgPool,
    schema: String,
}

impl PostgresMigrationTarget {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    fn lock_key(&self) -> String {
        format!("tenantstore:{}", self.schema)
    }

    async fn begin_locked(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(self.lock_key())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn read_watermark(&self, tx: &mut Transaction<'static, Postgres>) -> Result<u32> {
        let query = Query::select()
            .expr(Expr::cust(r#"COALESCE(MAX("version"), 0)"#))
            .from(tenant_table(&self.schema, Migrations::Table))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut **tx).await?;
        let version: i32 = row.try_get(0)?;
        Ok(version.max(0) as u32)
    }
}

#[async_trait]
impl MigrationTarget for PostgresMigrationTarget {
    fn partition(&self) -> &str {
        &self.schema
    }

    async fn prepare(&self) -> Result<()> {
        let schema = quote_ident(&self.schema);
        let mut tx = self.begin_locked().await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\
             version INTEGER PRIMARY KEY, \
             name TEXT NOT NULL, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            schema,
            quote_ident(crate::storage::helpers::MIGRATIONS_TABLE)
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn watermark(&self) -> Result<u32> {
        let mut tx = self.begin_locked().await?;
        let version = self.read_watermark(&mut tx).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn apply(&self, migration: &Migration) -> Result<bool> {
        let mut tx = self.begin_locked().await?;
        if self.read_watermark(&mut tx).await? >= migration.version {
            tx.rollback().await?;
            return Ok(false);
        }

        // Multi-statement scripts go through the simple query protocol.
        let rendered = migration.render(&quote_ident(&self.schema));
        let conn: &mut PgConnection = &mut tx;
        conn.execute(rendered.as_str()).await?;

        let insert = Query::insert()
            .into_table(tenant_table(&self.schema, Migrations::Table))
            .columns([Migrations::Version, Migrations::Name])
            .values_panic([(migration.version as i32).into(), migration.name.clone().into()])
            .to_string(PostgresQueryBuilder);
        sqlx::query(&insert).execute(&mut *tx).await?;

        tx.commit().await?;
        debug!(
            schema = %self.schema,
            version = migration.version,
            name = %migration.name,
            "Applied migration"
        );
        Ok(true)
    }
}
