//! Scheduled tasks stored in each base's `sb_tasks` table.

use async_trait::async_trait;
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::{is_missing_relation, tenant_table, PostgresPersister};
use crate::id::new_id;
use crate::interfaces::{Result, StorageError, TaskStore};
use crate::model::Task;
use crate::storage::helpers::validate_base_name;
use crate::storage::schema::Tasks;

const TASK_COLUMNS: [Tasks; 7] = [
    Tasks::Id,
    Tasks::Name,
    Tasks::TaskType,
    Tasks::Value,
    Tasks::Meta,
    Tasks::Interval,
    Tasks::LastRun,
];

fn task_from_row(row: &PgRow, base: &str) -> Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        task_type: row.try_get("type")?,
        value: row.try_get("value")?,
        meta: row.try_get("meta")?,
        interval: row.try_get("interval")?,
        last_run: row.try_get("last_run")?,
        base_name: base.to_string(),
    })
}

/// Map a failure on a base's system table: a missing schema or table means
/// the base was never provisioned.
pub(super) fn base_error(base: &str, e: sqlx::Error) -> StorageError {
    if is_missing_relation(&e) {
        StorageError::not_found("base", base)
    } else {
        e.into()
    }
}

#[async_trait]
impl TaskStore for PostgresPersister {
    async fn list_tasks_by_base(&self, base: &str) -> Result<Vec<Task>> {
        validate_base_name(base)?;
        let query = Query::select()
            .columns(TASK_COLUMNS)
            .from(tenant_table(base, Tasks::Table))
            .order_by(Tasks::Id, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        rows.iter().map(|row| task_from_row(row, base)).collect()
    }

    async fn add_task(&self, base: &str, mut task: Task) -> Result<Task> {
        validate_base_name(base)?;
        task.id = new_id();
        task.base_name = base.to_string();

        let (sql, values) = Query::insert()
            .into_table(tenant_table(base, Tasks::Table))
            .columns(TASK_COLUMNS)
            .values_panic([
                task.id.clone().into(),
                task.name.clone().into(),
                task.task_type.clone().into(),
                task.value.clone().into(),
                task.meta.clone().into(),
                task.interval.clone().into(),
                task.last_run.into(),
            ])
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        Ok(task)
    }

    async fn delete_task(&self, base: &str, id: &str) -> Result<()> {
        validate_base_name(base)?;
        let query = Query::delete()
            .from_table(tenant_table(base, Tasks::Table))
            .and_where(Expr::col(Tasks::Id).eq(id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("task", id));
        }
        Ok(())
    }
}
