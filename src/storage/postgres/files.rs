//! File metadata in each base's `sb_files` table.

use async_trait::async_trait;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::Row;

use super::tasks::base_error;
use super::{tenant_table, PostgresPersister};
use crate::id::new_id;
use crate::interfaces::{FileStore, Result, StorageError};
use crate::model::File;
use crate::storage::helpers::validate_base_name;
use crate::storage::schema::Files;

const FILE_COLUMNS: [Files; 6] = [
    Files::Id,
    Files::AccountId,
    Files::Key,
    Files::Url,
    Files::Size,
    Files::Uploaded,
];

#[async_trait]
impl FileStore for PostgresPersister {
    async fn add_file(&self, base: &str, mut file: File) -> Result<String> {
        validate_base_name(base)?;
        file.id = new_id();

        let query = Query::insert()
            .into_table(tenant_table(base, Files::Table))
            .columns(FILE_COLUMNS)
            .values_panic([
                file.id.clone().into(),
                file.account_id.into(),
                file.key.into(),
                file.url.into(),
                file.size.into(),
                file.uploaded.into(),
            ])
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        Ok(file.id)
    }

    async fn get_file_by_id(&self, base: &str, id: &str) -> Result<File> {
        validate_base_name(base)?;
        let query = Query::select()
            .columns(FILE_COLUMNS)
            .from(tenant_table(base, Files::Table))
            .and_where(Expr::col(Files::Id).eq(id))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?
            .ok_or_else(|| StorageError::not_found("file", id))?;

        Ok(File {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            key: row.try_get("key")?,
            url: row.try_get("url")?,
            size: row.try_get("size")?,
            uploaded: row.try_get("uploaded")?,
        })
    }

    async fn delete_file(&self, base: &str, id: &str) -> Result<()> {
        validate_base_name(base)?;
        let query = Query::delete()
            .from_table(tenant_table(base, Files::Table))
            .and_where(Expr::col(Files::Id).eq(id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| base_error(base, e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("file", id));
        }
        Ok(())
    }
}
