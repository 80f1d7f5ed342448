//! DocumentStore over one JSONB table per collection.

use async_trait::async_trait;
use sea_query::{
    Alias, ColumnDef, Condition as SqlCondition, Expr, Index, NullOrdering, Order,
    PostgresQueryBuilder, Query, SelectStatement, Table,
};
use sea_query_binder::SqlxBinder;
use serde_json::Value;
use sqlx::Row;
use tracing::debug;

use super::filter::{compile, field_path, order_exprs};
use super::{
    is_concurrent_create, is_missing_relation, is_unique_violation, quote_ident, tenant_table,
    PostgresPersister,
};
use crate::interfaces::{DocumentStore, EventKind, Result, StorageError};
use crate::model::{Document, ListParams, PagedResult, Principal};
use crate::query::{validate_field, Filter};
use crate::storage::helpers::{
    is_reserved, prepare_new_document, publish_document_event, sanitize_update,
    validate_base_name, validate_increment_field, validate_list_params, validate_target,
    MAX_NAME_LEN,
};
use crate::storage::schema::Documents;

/// Name of an index on `collection`, within the identifier limit.
///
/// `$` never appears in collection or field names, so it separates the
/// collection from the field and stands in for the dots of a path.
pub(crate) fn index_name(prefix: &str, collection: &str, field: &str) -> String {
    let name = format!("{}_{}${}", prefix, collection, field.replace('.', "$"));
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    // FNV-1a keeps truncated names distinct.
    let hash = name.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{}_{:016x}", &name[..MAX_NAME_LEN - 17], hash)
}

fn document_from_value(value: Value) -> Result<Document> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(StorageError::Serialization(format!(
            "stored document is not an object: {}",
            other
        ))),
    }
}

/// Restrict a statement to what `auth` may see.
fn scope_condition(auth: &Principal) -> SqlCondition {
    match auth.scope() {
        Some(account) => SqlCondition::all().add(Expr::col(Documents::AccountId).eq(account)),
        None => SqlCondition::all(),
    }
}

fn by_id(auth: &Principal, id: &str) -> SqlCondition {
    scope_condition(auth).add(Expr::col(Documents::Id).eq(id))
}

impl PostgresPersister {
    /// Create the base schema and the collection table when missing.
    async fn ensure_collection(&self, base: &str, collection: &str) -> Result<()> {
        let table = tenant_table(base, Alias::new(collection));
        let create_table = Table::create()
            .table(table.clone())
            .if_not_exists()
            .col(ColumnDef::new(Documents::Id).text().not_null().primary_key())
            .col(
                ColumnDef::new(Documents::AccountId)
                    .text()
                    .not_null()
                    .default(""),
            )
            .col(ColumnDef::new(Documents::Data).json_binary().not_null())
            .col(
                ColumnDef::new(Documents::Created)
                    .timestamp_with_time_zone()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .to_string(PostgresQueryBuilder);
        let create_index = Index::create()
            .if_not_exists()
            .name(index_name("own", collection, "account_id"))
            .table(table)
            .col(Documents::AccountId)
            .to_string(PostgresQueryBuilder);

        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(base)),
            create_table,
            create_index,
        ];
        for statement in &statements {
            match sqlx::query(statement).execute(&self.pool).await {
                Ok(_) => {}
                Err(e) if is_concurrent_create(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(base = %base, collection = %collection, "Ensured collection table");
        Ok(())
    }

    /// Count and fetch one page of a filtered listing.
    async fn page(
        &self,
        base: &str,
        collection: &str,
        condition: SqlCondition,
        params: &ListParams,
    ) -> Result<PagedResult<Document>> {
        let table = tenant_table(base, Alias::new(collection));

        let (count_sql, count_values) = Query::select()
            .expr(Expr::cust("COUNT(*)"))
            .from(table.clone())
            .cond_where(condition.clone())
            .build_sqlx(PostgresQueryBuilder);

        let mut select = SelectStatement::new();
        select
            .column(Documents::Data)
            .from(table)
            .cond_where(condition)
            .limit(u64::from(params.effective_size()))
            .offset(params.skip());
        for (expr, order) in order_exprs(params.sort_field(), params.sort_descending) {
            let nulls = match order {
                Order::Desc => NullOrdering::Last,
                _ => NullOrdering::First,
            };
            select.order_by_expr_with_nulls(expr, order, nulls);
        }
        let (sql, values) = select.build_sqlx(PostgresQueryBuilder);

        let total: i64 = match sqlx::query_with(&count_sql, count_values)
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => row.try_get(0)?,
            Err(e) if is_missing_relation(&e) => {
                return Ok(PagedResult::new(params, 0, Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        let results = rows
            .iter()
            .map(|row| document_from_value(row.try_get("data")?))
            .collect::<Result<Vec<_>>>()?;
        Ok(PagedResult::new(params, total.max(0) as u64, results))
    }

    async fn insert_documents(
        &self,
        base: &str,
        collection: &str,
        account_id: &str,
        docs: &[(String, Document)],
    ) -> std::result::Result<(), sqlx::Error> {
        let mut insert = Query::insert();
        insert
            .into_table(tenant_table(base, Alias::new(collection)))
            .columns([Documents::Id, Documents::AccountId, Documents::Data]);
        for (id, doc) in docs {
            insert.values_panic([
                id.clone().into(),
                account_id.into(),
                Value::Object(doc.clone()).into(),
            ]);
        }
        let (sql, values) = insert.build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert, creating the collection table on first write.
    async fn insert_with_create(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        docs: &[(String, Document)],
    ) -> Result<()> {
        let first = self
            .insert_documents(base, collection, &auth.account_id, docs)
            .await;
        let outcome = match first {
            Err(e) if is_missing_relation(&e) => {
                self.ensure_collection(base, collection).await?;
                self.insert_documents(base, collection, &auth.account_id, docs)
                    .await
            }
            other => other,
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                let key = match docs {
                    [(id, _)] => id.clone(),
                    _ => e
                        .as_database_error()
                        .map(|d| d.message().to_string())
                        .unwrap_or_default(),
                };
                Err(StorageError::conflict("document", key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn document_exists(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<bool> {
        let (sql, values) = Query::select()
            .column(Documents::Id)
            .from(tenant_table(base, Alias::new(collection)))
            .cond_where(by_id(auth, id))
            .build_sqlx(PostgresQueryBuilder);
        match sqlx::query_with(&sql, values).fetch_optional(&self.pool).await {
            Ok(row) => Ok(row.is_some()),
            Err(e) if is_missing_relation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresPersister {
    async fn create_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        doc: Document,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        let (id, doc) = prepare_new_document(auth, doc)?;
        let docs = [(id, doc)];
        self.insert_with_create(auth, base, collection, &docs).await?;

        let [(_, doc)] = docs;
        publish_document_event(
            self.publisher.as_ref(),
            collection,
            EventKind::Created,
            Value::Object(doc.clone()),
        );
        Ok(doc)
    }

    #[tracing::instrument(name = "documents.bulk_create", skip_all, fields(%base, %collection, count = docs.len()))]
    async fn bulk_create_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        validate_target(base, collection)?;
        if docs.is_empty() {
            return Ok(());
        }

        let prepared = docs
            .into_iter()
            .map(|d| prepare_new_document(auth, d))
            .collect::<Result<Vec<_>>>()?;
        let mut seen = std::collections::HashSet::new();
        if let Some((id, _)) = prepared.iter().find(|(id, _)| !seen.insert(id.as_str())) {
            return Err(StorageError::conflict("document", id.clone()));
        }

        self.insert_with_create(auth, base, collection, &prepared)
            .await?;

        for (_, doc) in prepared {
            publish_document_event(
                self.publisher.as_ref(),
                collection,
                EventKind::Created,
                Value::Object(doc),
            );
        }
        Ok(())
    }

    async fn list_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        params: &ListParams,
    ) -> Result<PagedResult<Document>> {
        validate_target(base, collection)?;
        validate_list_params(params)?;
        self.page(base, collection, scope_condition(auth), params)
            .await
    }

    async fn get_document_by_id(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        let (sql, values) = Query::select()
            .column(Documents::Data)
            .from(tenant_table(base, Alias::new(collection)))
            .cond_where(by_id(auth, id))
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).fetch_optional(&self.pool).await {
            Ok(Some(row)) => document_from_value(row.try_get("data")?),
            Ok(None) => Err(StorageError::not_found("document", id)),
            Err(e) if is_missing_relation(&e) => Err(StorageError::not_found("document", id)),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(name = "documents.query", skip_all, fields(%base, %collection))]
    async fn query_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        filter: &Filter,
        params: &ListParams,
    ) -> Result<PagedResult<Document>> {
        validate_target(base, collection)?;
        validate_list_params(params)?;
        for condition in filter.conditions() {
            validate_field(&condition.field)?;
        }
        let condition = scope_condition(auth).add(compile(filter));
        self.page(base, collection, condition, params).await
    }

    async fn update_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        let changes = Value::Object(sanitize_update(doc)?);

        let (sql, values) = Query::update()
            .table(tenant_table(base, Alias::new(collection)))
            .value(
                Documents::Data,
                Expr::cust_with_values(r#""data" || $1"#, [changes]),
            )
            .cond_where(by_id(auth, id))
            .returning_col(Documents::Data)
            .build_sqlx(PostgresQueryBuilder);

        let updated = match sqlx::query_with(&sql, values).fetch_optional(&self.pool).await {
            Ok(Some(row)) => document_from_value(row.try_get("data")?)?,
            Ok(None) => return Err(StorageError::not_found("document", id)),
            Err(e) if is_missing_relation(&e) => {
                return Err(StorageError::not_found("document", id))
            }
            Err(e) => return Err(e.into()),
        };

        publish_document_event(
            self.publisher.as_ref(),
            collection,
            EventKind::Updated,
            Value::Object(updated.clone()),
        );
        Ok(updated)
    }

    async fn increment_value(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<()> {
        validate_target(base, collection)?;
        validate_increment_field(field)?;

        let increment = format!(
            r#"jsonb_set("data", '{{{f}}}', to_jsonb(COALESCE(("data"->>'{f}')::numeric, 0) + $1), true)"#,
            f = field
        );
        let numeric_or_missing = format!(
            r#"("data"->'{f}' IS NULL OR jsonb_typeof("data"->'{f}') = 'number')"#,
            f = field
        );
        let (sql, values) = Query::update()
            .table(tenant_table(base, Alias::new(collection)))
            .value(Documents::Data, Expr::cust_with_values(increment, [delta]))
            .cond_where(by_id(auth, id).add(Expr::cust(numeric_or_missing)))
            .build_sqlx(PostgresQueryBuilder);

        let affected = match sqlx::query_with(&sql, values).execute(&self.pool).await {
            Ok(result) => result.rows_affected(),
            Err(e) if is_missing_relation(&e) => 0,
            Err(e) => return Err(e.into()),
        };
        if affected > 0 {
            return Ok(());
        }

        if self.document_exists(auth, base, collection, id).await? {
            Err(StorageError::validation(format!(
                "cannot increment non-numeric field '{}'",
                field
            )))
        } else {
            Err(StorageError::not_found("document", id))
        }
    }

    async fn delete_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<u64> {
        validate_target(base, collection)?;
        let (sql, values) = Query::delete()
            .from_table(tenant_table(base, Alias::new(collection)))
            .cond_where(by_id(auth, id))
            .build_sqlx(PostgresQueryBuilder);

        let removed = match sqlx::query_with(&sql, values).execute(&self.pool).await {
            Ok(result) => result.rows_affected(),
            Err(e) if is_missing_relation(&e) => 0,
            Err(e) => return Err(e.into()),
        };

        if removed > 0 {
            publish_document_event(
                self.publisher.as_ref(),
                collection,
                EventKind::Deleted,
                Value::String(id.to_string()),
            );
        }
        Ok(removed)
    }

    async fn create_index(&self, base: &str, collection: &str, field: &str) -> Result<()> {
        validate_target(base, collection)?;
        validate_field(field)?;
        self.ensure_collection(base, collection).await?;

        let statement = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}.{} ({})",
            quote_ident(&index_name("idx", collection, field)),
            quote_ident(base),
            quote_ident(collection),
            field_path(field)
        );
        match sqlx::query(&statement).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_concurrent_create(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_collections(&self, base: &str) -> Result<Vec<String>> {
        validate_base_name(base)?;
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(base)
        .fetch_all(&self.pool)
        .await?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("table_name")?;
            if !is_reserved(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}
