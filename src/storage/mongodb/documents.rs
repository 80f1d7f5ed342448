//! DocumentStore over one MongoDB collection per user collection.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document as BsonDocument};
use mongodb::options::ReturnDocument;
use mongodb::IndexModel;
use serde_json::Value;
use tracing::warn;

use super::filter::{compile, field_name, scoped, sort_document};
use super::{
    from_bson_document, is_duplicate_key, is_type_mismatch, to_bson_document, MongoPersister,
};
use crate::interfaces::{DocumentStore, EventKind, Result, StorageError};
use crate::model::{Document, ListParams, PagedResult, Principal};
use crate::query::{validate_field, Filter};
use crate::storage::helpers::{
    is_reserved, prepare_new_document, publish_document_event, sanitize_update,
    validate_base_name, validate_increment_field, validate_list_params, validate_target,
};

fn by_id(auth: &Principal, id: &str) -> BsonDocument {
    scoped(auth.scope(), doc! { "_id": id })
}

impl MongoPersister {
    async fn page(
        &self,
        base: &str,
        collection: &str,
        query: BsonDocument,
        params: &ListParams,
    ) -> Result<PagedResult<Document>> {
        let coll = self.collection(base, collection);
        let total = coll.count_documents(query.clone()).await?;

        let docs: Vec<BsonDocument> = coll
            .find(query)
            .sort(sort_document(params.sort_field(), params.sort_descending))
            .skip(params.skip())
            .limit(i64::from(params.effective_size()))
            .await?
            .try_collect()
            .await?;

        let results = docs
            .into_iter()
            .map(from_bson_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(PagedResult::new(params, total, results))
    }
}

#[async_trait]
impl DocumentStore for MongoPersister {
    async fn create_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        doc: Document,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        let (id, doc) = prepare_new_document(auth, doc)?;

        match self
            .collection(base, collection)
            .insert_one(to_bson_document(&doc)?)
            .await
        {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => return Err(StorageError::conflict("document", id)),
            Err(e) => return Err(e.into()),
        }

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
        let converted = prepared
            .iter()
            .map(|(_, doc)| to_bson_document(doc))
            .collect::<Result<Vec<_>>>()?;

        let coll = self.collection(base, collection);
        let ids: Vec<&str> = prepared.iter().map(|(id, _)| id.as_str()).collect();
        if let Some(existing) = coll.find_one(doc! { "_id": { "$in": ids } }).await? {
            let id = existing.get_str("_id").unwrap_or_default().to_string();
            return Err(StorageError::conflict("document", id));
        }

        if let Err(e) = coll.insert_many(converted.clone()).ordered(true).await {
            // A concurrent writer took one of the ids. Remove what the
            // ordered insert stored before it stopped; matching on the whole
            // document leaves the other writer's document in place.
            for stored in &converted {
                if let Err(cleanup) = coll.delete_one(stored.clone()).await {
                    warn!(
                        base = %base,
                        collection = %collection,
                        error = %cleanup,
                        "Failed to remove partially inserted document"
                    );
                }
            }
            return Err(if is_duplicate_key(&e) {
                StorageError::conflict("document", e.to_string())
            } else {
                e.into()
            });
        }

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
        self.page(base, collection, scoped(auth.scope(), doc! {}), params)
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
        match self
            .collection(base, collection)
            .find_one(by_id(auth, id))
            .await?
        {
            Some(doc) => from_bson_document(doc),
            None => Err(StorageError::not_found("document", id)),
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
        let query = scoped(auth.scope(), compile(filter)?);
        self.page(base, collection, query, params).await
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
        let changes = to_bson_document(&sanitize_update(doc)?)?;

        let coll = self.collection(base, collection);
        let stored = if changes.is_empty() {
            coll.find_one(by_id(auth, id)).await?
        } else {
            coll.find_one_and_update(by_id(auth, id), doc! { "$set": changes })
                .return_document(ReturnDocument::After)
                .await?
        };
        let updated = match stored {
            Some(doc) => from_bson_document(doc)?,
            None => return Err(StorageError::not_found("document", id)),
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

        let mut increment = BsonDocument::new();
        increment.insert(field, delta);
        let result = self
            .collection(base, collection)
            .update_one(by_id(auth, id), doc! { "$inc": increment })
            .await;

        match result {
            Ok(r) if r.matched_count == 0 => Err(StorageError::not_found("document", id)),
            Ok(_) => Ok(()),
            Err(e) if is_type_mismatch(&e) => Err(StorageError::validation(format!(
                "cannot increment non-numeric field '{}'",
                field
            ))),
            Err(e) => Err(e.into()),
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
        let result = self
            .collection(base, collection)
            .delete_one(by_id(auth, id))
            .await?;

        if result.deleted_count > 0 {
            publish_document_event(
                self.publisher.as_ref(),
                collection,
                EventKind::Deleted,
                Value::String(id.to_string()),
            );
        }
        Ok(result.deleted_count)
    }

    async fn create_index(&self, base: &str, collection: &str, field: &str) -> Result<()> {
        validate_target(base, collection)?;
        validate_field(field)?;

        let mut keys = BsonDocument::new();
        keys.insert(field_name(field), 1);
        self.collection(base, collection)
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
        Ok(())
    }

    async fn list_collections(&self, base: &str) -> Result<Vec<String>> {
        validate_base_name(base)?;
        let mut names: Vec<String> = self
            .database(base)
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !is_reserved(name) && !name.starts_with("system."))
            .collect();
        names.sort();
        Ok(names)
    }
}
