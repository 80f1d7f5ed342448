//! Tasks, files and functions in each base's `sb_*` collections.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document as BsonDocument};
use serde_json::Value;

use super::{
    bson_field_error, from_bson_datetime, is_duplicate_key, optional_datetime, to_bson,
    to_bson_datetime, MongoPersister,
};
use crate::id::new_id;
use crate::interfaces::{FileStore, FunctionStore, Result, StorageError, TaskStore};
use crate::model::{File, FunctionInfo, Task};
use crate::storage::helpers::{
    validate_base_name, FILES_COLLECTION, FUNCTIONS_COLLECTION, TASKS_COLLECTION,
};

fn optional_bson_datetime(at: Option<chrono::DateTime<Utc>>) -> Bson {
    at.map(|at| Bson::DateTime(to_bson_datetime(at)))
        .unwrap_or(Bson::Null)
}

fn get_string(doc: &BsonDocument, key: &str) -> Result<String> {
    doc.get_str(key)
        .map(str::to_string)
        .map_err(bson_field_error)
}

fn task_to_document(task: &Task) -> Result<BsonDocument> {
    Ok(doc! {
        "_id": &task.id,
        "name": &task.name,
        "type": &task.task_type,
        "value": &task.value,
        "meta": to_bson(&task.meta)?,
        "interval": &task.interval,
        "lastRun": optional_bson_datetime(task.last_run),
    })
}

fn task_from_document(doc: BsonDocument, base: &str) -> Result<Task> {
    let meta = doc
        .get("meta")
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .unwrap_or(Value::Null);
    Ok(Task {
        id: get_string(&doc, "_id")?,
        name: get_string(&doc, "name")?,
        task_type: get_string(&doc, "type")?,
        value: get_string(&doc, "value")?,
        meta,
        interval: get_string(&doc, "interval")?,
        last_run: optional_datetime(&doc, "lastRun"),
        base_name: base.to_string(),
    })
}

fn function_from_document(doc: &BsonDocument) -> Result<FunctionInfo> {
    let version = match doc.get("version") {
        Some(Bson::Int32(v)) => *v,
        Some(Bson::Int64(v)) => i32::try_from(*v).unwrap_or(i32::MAX),
        _ => 1,
    };
    Ok(FunctionInfo {
        id: get_string(doc, "_id")?,
        name: get_string(doc, "name")?,
        trigger_topic: get_string(doc, "triggerTopic")?,
        code: get_string(doc, "code")?,
        version,
        last_updated: from_bson_datetime(
            *doc.get_datetime("lastUpdated").map_err(bson_field_error)?,
        ),
        last_run: optional_datetime(doc, "lastRun"),
    })
}

#[async_trait]
impl TaskStore for MongoPersister {
    async fn list_tasks_by_base(&self, base: &str) -> Result<Vec<Task>> {
        validate_base_name(base)?;
        let docs: Vec<BsonDocument> = self
            .collection(base, TASKS_COLLECTION)
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        docs.into_iter()
            .map(|doc| task_from_document(doc, base))
            .collect()
    }

    async fn add_task(&self, base: &str, mut task: Task) -> Result<Task> {
        validate_base_name(base)?;
        task.id = new_id();
        task.base_name = base.to_string();
        self.collection(base, TASKS_COLLECTION)
            .insert_one(task_to_document(&task)?)
            .await?;
        Ok(task)
    }

    async fn delete_task(&self, base: &str, id: &str) -> Result<()> {
        validate_base_name(base)?;
        let result = self
            .collection(base, TASKS_COLLECTION)
            .delete_one(doc! { "_id": id })
            .await?;
        if result.deleted_count == 0 {
            return Err(StorageError::not_found("task", id));
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for MongoPersister {
    async fn add_file(&self, base: &str, mut file: File) -> Result<String> {
        validate_base_name(base)?;
        file.id = new_id();
        self.collection(base, FILES_COLLECTION)
            .insert_one(doc! {
                "_id": &file.id,
                "accountId": &file.account_id,
                "key": &file.key,
                "url": &file.url,
                "size": file.size,
                "uploaded": to_bson_datetime(file.uploaded),
            })
            .await?;
        Ok(file.id)
    }

    async fn get_file_by_id(&self, base: &str, id: &str) -> Result<File> {
        validate_base_name(base)?;
        let doc = self
            .collection(base, FILES_COLLECTION)
            .find_one(doc! { "_id": id })
            .await?
            .ok_or_else(|| StorageError::not_found("file", id))?;

        let size = match doc.get("size") {
            Some(Bson::Int64(n)) => *n,
            Some(Bson::Int32(n)) => i64::from(*n),
            _ => 0,
        };
        Ok(File {
            id: get_string(&doc, "_id")?,
            account_id: get_string(&doc, "accountId")?,
            key: get_string(&doc, "key")?,
            url: get_string(&doc, "url")?,
            size,
            uploaded: from_bson_datetime(*doc.get_datetime("uploaded").map_err(bson_field_error)?),
        })
    }

    async fn delete_file(&self, base: &str, id: &str) -> Result<()> {
        validate_base_name(base)?;
        let result = self
            .collection(base, FILES_COLLECTION)
            .delete_one(doc! { "_id": id })
            .await?;
        if result.deleted_count == 0 {
            return Err(StorageError::not_found("file", id));
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionStore for MongoPersister {
    async fn add_function(&self, base: &str, mut function: FunctionInfo) -> Result<String> {
        validate_base_name(base)?;
        function.id = new_id();
        let result = self
            .collection(base, FUNCTIONS_COLLECTION)
            .insert_one(doc! {
                "_id": &function.id,
                "name": &function.name,
                "triggerTopic": &function.trigger_topic,
                "code": &function.code,
                "version": function.version,
                "lastUpdated": to_bson_datetime(Utc::now()),
                "lastRun": optional_bson_datetime(function.last_run),
            })
            .await;

        match result {
            Ok(_) => Ok(function.id),
            Err(e) if is_duplicate_key(&e) => {
                Err(StorageError::conflict("function", function.name))
            }
            Err(e) => Err(e.into()),
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
        let result = self
            .collection(base, FUNCTIONS_COLLECTION)
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$set": {
                        "code": code,
                        "triggerTopic": trigger,
                        "lastUpdated": to_bson_datetime(Utc::now()),
                    },
                    "$inc": { "version": 1 },
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found("function", id));
        }
        Ok(())
    }

    async fn get_function_by_name(&self, base: &str, name: &str) -> Result<FunctionInfo> {
        validate_base_name(base)?;
        match self
            .collection(base, FUNCTIONS_COLLECTION)
            .find_one(doc! { "name": name })
            .await?
        {
            Some(doc) => function_from_document(&doc),
            None => Err(StorageError::not_found("function", name)),
        }
    }

    async fn list_functions(&self, base: &str) -> Result<Vec<FunctionInfo>> {
        validate_base_name(base)?;
        let docs: Vec<BsonDocument> = self
            .collection(base, FUNCTIONS_COLLECTION)
            .find(doc! {})
            .sort(doc! { "name": 1 })
            .await?
            .try_collect()
            .await?;
        docs.iter().map(function_from_document).collect()
    }

    async fn delete_function(&self, base: &str, name: &str) -> Result<()> {
        validate_base_name(base)?;
        let result = self
            .collection(base, FUNCTIONS_COLLECTION)
            .delete_one(doc! { "name": name })
            .await?;
        if result.deleted_count == 0 {
            return Err(StorageError::not_found("function", name));
        }
        Ok(())
    }
}
