//! Function metadata in each base's `sb_functions` table.

use async_trait::async_trait;
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::tasks::base_error;
use super::{is_missing_relation, is_unique_violation, tenant_table, PostgresPersister};
use crate::id::new_id;
use crate::interfaces::{FunctionStore, Result, StorageError};
use crate::model::FunctionInfo;
use crate::storage::helpers::validate_base_name;
use crate::storage::schema::Functions;

const FUNCTION_COLUMNS: [Functions; 7] = [
    Functions::Id,
    Functions::Name,
    Functions::TriggerTopic,
    Functions::Code,
    Functions::Version,
    Functions::LastUpdated,
    Functions::LastRun,
];

fn function_from_row(row: &PgRow) -> Result<FunctionInfo> {
    Ok(FunctionInfo {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        trigger_topic: row.try_get("trigger_topic")?,
        code: row.try_get("code")?,
        version: row.try_get("version")?,
        last_updated: row.try_get("last_updated")?,
        last_run: row.try_get("last_run")?,
    })
}

#[async_trait]
impl FunctionStore for PostgresPersister {
    async fn add_function(&self, base: &str, mut function: FunctionInfo) -> Result<String> {
        validate_base_name(base)?;
        function.id = new_id();

        let query = Query::insert()
            .into_table(tenant_table(base, Functions::Table))
            .columns(FUNCTION_COLUMNS)
            .values_panic([
                function.id.clone().into(),
                function.name.clone().into(),
                function.trigger_topic.into(),
                function.code.into(),
                function.version.into(),
                chrono::Utc::now().into(),
                function.last_run.into(),
            ])
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(function.id),
            Err(e) if is_unique_violation(&e) => {
                Err(StorageError::conflict("function", function.name))
            }
            Err(e) => Err(base_error(base, e)),
        }
    }

    async fn update_function(
        &self,
        base: &str,
        id: &str,
        code: &str,
        trigger: &str,
    ) -> Result<()> {
        validate_base_name(base)?;
        let query = Query::update()
            .table(tenant_table(base, Functions::Table))
            .value(Functions::Code, code)
            .value(Functions::TriggerTopic, trigger)
            .value(Functions::Version, Expr::col(Functions::Version).add(1))
            .value(Functions::LastUpdated, Expr::current_timestamp())
            .and_where(Expr::col(Functions::Id).eq(id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("function", id));
        }
        Ok(())
    }

    async fn get_function_by_name(&self, base: &str, name: &str) -> Result<FunctionInfo> {
        validate_base_name(base)?;
        let query = Query::select()
            .columns(FUNCTION_COLUMNS)
            .from(tenant_table(base, Functions::Table))
            .and_where(Expr::col(Functions::Name).eq(name))
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?
        {
            Some(row) => function_from_row(&row),
            None => Err(StorageError::not_found("function", name)),
        }
    }

    async fn list_functions(&self, base: &str) -> Result<Vec<FunctionInfo>> {
        validate_base_name(base)?;
        let query = Query::select()
            .columns(FUNCTION_COLUMNS)
            .from(tenant_table(base, Functions::Table))
            .order_by(Functions::Name, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = match sqlx::query(&query).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_missing_relation(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(function_from_row).collect()
    }

    async fn delete_function(&self, base: &str, name: &str) -> Result<()> {
        validate_base_name(base)?;
        let query = Query::delete()
            .from_table(tenant_table(base, Functions::Table))
            .and_where(Expr::col(Functions::Name).eq(name))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("function", name));
        }
        Ok(())
    }
}
