//! In-memory DocumentStore.

use async_trait::async_trait;
use serde_json::{Number, Value};

use super::MockPersister;
use crate::interfaces::{DocumentStore, EventKind, Result, StorageError};
use crate::model::{document_id, Document, ListParams, PagedResult, Principal, ACCOUNT_FIELD};
use crate::query::{compare_for_sort, lookup, matches, validate_field, Filter};
use crate::storage::helpers::{
    is_reserved, prepare_new_document, publish_document_event, sanitize_update,
    validate_base_name, validate_increment_field, validate_list_params, validate_target,
};

/// Whether `auth` may see `doc`.
fn visible(auth: &Principal, doc: &Document) -> bool {
    match auth.scope() {
        None => true,
        Some(account) => doc.get(ACCOUNT_FIELD).and_then(Value::as_str) == Some(account),
    }
}

fn sort_page(mut docs: Vec<Document>, params: &ListParams) -> PagedResult<Document> {
    let field = params.sort_field().to_string();
    docs.sort_by(|a, b| {
        let primary = compare_for_sort(lookup(a, &field), lookup(b, &field));
        let ordering = primary.then_with(|| document_id(a).cmp(&document_id(b)));
        if params.sort_descending {
            ordering.reverse()
        } else {
            ordering
        }
    });

    let total = docs.len() as u64;
    let results = docs
        .into_iter()
        .skip(params.skip() as usize)
        .take(params.effective_size() as usize)
        .collect();
    PagedResult::new(params, total, results)
}

/// `current + delta`, keeping integers integral.
fn add_number(current: &Number, delta: i64) -> Option<Number> {
    if let Some(i) = current.as_i64() {
        return i.checked_add(delta).map(Number::from);
    }
    current
        .as_f64()
        .and_then(|f| Number::from_f64(f + delta as f64))
}

impl MockPersister {
    async fn visible_documents(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Vec<Document> {
        self.partitions
            .read()
            .await
            .get(base)
            .and_then(|p| p.collections.get(collection))
            .map(|docs| {
                docs.values()
                    .filter(|d| visible(auth, d))
                    .filter(|d| filter.map(|f| matches(f, d)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MockPersister {
    async fn create_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        doc: Document,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        let (id, doc) = prepare_new_document(auth, doc)?;

        {
            let mut partitions = self.partitions.write().await;
            let docs = partitions
                .entry(base.to_string())
                .or_default()
                .collections
                .entry(collection.to_string())
                .or_default();
            if docs.contains_key(&id) {
                return Err(StorageError::conflict("document", id));
            }
            docs.insert(id, doc.clone());
        }

        publish_document_event(
            self.publisher.as_ref(),
            collection,
            EventKind::Created,
            Value::Object(doc.clone()),
        );
        Ok(doc)
    }

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

        {
            let mut partitions = self.partitions.write().await;
            let stored = partitions
                .entry(base.to_string())
                .or_default()
                .collections
                .entry(collection.to_string())
                .or_default();

            let mut seen = std::collections::HashSet::new();
            for (id, _) in &prepared {
                if stored.contains_key(id) || !seen.insert(id.as_str()) {
                    return Err(StorageError::conflict("document", id.clone()));
                }
            }
            for (id, doc) in &prepared {
                stored.insert(id.clone(), doc.clone());
            }
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
        let docs = self.visible_documents(auth, base, collection, None).await;
        Ok(sort_page(docs, params))
    }

    async fn get_document_by_id(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<Document> {
        validate_target(base, collection)?;
        self.partitions
            .read()
            .await
            .get(base)
            .and_then(|p| p.collections.get(collection))
            .and_then(|docs| docs.get(id))
            .filter(|d| visible(auth, d))
            .cloned()
            .ok_or_else(|| StorageError::not_found("document", id))
    }

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
        let docs = self.visible_documents(auth, base, collection, Some(filter)).await;
        Ok(sort_page(docs, params))
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
        let changes = sanitize_update(doc)?;

        let updated = {
            let mut partitions = self.partitions.write().await;
            let stored = partitions
                .get_mut(base)
                .and_then(|p| p.collections.get_mut(collection))
                .and_then(|docs| docs.get_mut(id))
                .filter(|d| visible(auth, d))
                .ok_or_else(|| StorageError::not_found("document", id))?;
            for (key, value) in changes {
                stored.insert(key, value);
            }
            stored.clone()
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

        let mut partitions = self.partitions.write().await;
        let stored = partitions
            .get_mut(base)
            .and_then(|p| p.collections.get_mut(collection))
            .and_then(|docs| docs.get_mut(id))
            .filter(|d| visible(auth, d))
            .ok_or_else(|| StorageError::not_found("document", id))?;

        let next = match stored.get(field) {
            None => Number::from(delta),
            Some(Value::Number(current)) => add_number(current, delta).ok_or_else(|| {
                StorageError::validation(format!("increment of '{}' overflows", field))
            })?,
            Some(other) => {
                return Err(StorageError::validation(format!(
                    "cannot increment non-numeric field '{}' ({})",
                    field, other
                )))
            }
        };
        stored.insert(field.to_string(), Value::Number(next));
        Ok(())
    }

    async fn delete_document(
        &self,
        auth: &Principal,
        base: &str,
        collection: &str,
        id: &str,
    ) -> Result<u64> {
        validate_target(base, collection)?;

        let removed = {
            let mut partitions = self.partitions.write().await;
            match partitions
                .get_mut(base)
                .and_then(|p| p.collections.get_mut(collection))
            {
                Some(docs) if docs.get(id).map(|d| visible(auth, d)).unwrap_or(false) => {
                    docs.remove(id).is_some()
                }
                _ => false,
            }
        };

        if !removed {
            return Ok(0);
        }
        publish_document_event(
            self.publisher.as_ref(),
            collection,
            EventKind::Deleted,
            Value::String(id.to_string()),
        );
        Ok(1)
    }

    async fn create_index(&self, base: &str, collection: &str, field: &str) -> Result<()> {
        validate_target(base, collection)?;
        validate_field(field)?;

        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(base.to_string()).or_default();
        partition
            .collections
            .entry(collection.to_string())
            .or_default();
        partition
            .indexes
            .insert((collection.to_string(), field.to_string()));
        Ok(())
    }

    async fn list_collections(&self, base: &str) -> Result<Vec<String>> {
        validate_base_name(base)?;
        Ok(self
            .partitions
            .read()
            .await
            .get(base)
            .map(|p| {
                p.collections
                    .keys()
                    .filter(|name| !is_reserved(name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
