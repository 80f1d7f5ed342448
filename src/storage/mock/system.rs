//! In-memory file and function metadata.

use async_trait::async_trait;
use chrono::Utc;

use super::MockPersister;
use crate::id::new_id;
use crate::interfaces::{FileStore, FunctionStore, Result, StorageError};
use crate::model::{File, FunctionInfo};
use crate::storage::helpers::validate_base_name;

#[async_trait]
impl FileStore for MockPersister {
    async fn add_file(&self, base: &str, mut file: File) -> Result<String> {
        validate_base_name(base)?;
        file.id = new_id();
        let id = file.id.clone();
        self.partitions
            .write()
            .await
            .entry(base.to_string())
            .or_default()
            .files
            .insert(id.clone(), file);
        Ok(id)
    }

    async fn get_file_by_id(&self, base: &str, id: &str) -> Result<File> {
        self.partitions
            .read()
            .await
            .get(base)
            .and_then(|p| p.files.get(id))
            .cloned()
            .ok_or_else(|| StorageError::not_found("file", id))
    }

    async fn delete_file(&self, base: &str, id: &str) -> Result<()> {
        self.partitions
            .write()
            .await
            .get_mut(base)
            .and_then(|p| p.files.remove(id))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("file", id))
    }
}

#[async_trait]
impl FunctionStore for MockPersister {
    async fn add_function(&self, base: &str, mut function: FunctionInfo) -> Result<String> {
        validate_base_name(base)?;
        let mut partitions = self.partitions.write().await;
        let functions = &mut partitions.entry(base.to_string()).or_default().functions;

        if functions.values().any(|f| f.name == function.name) {
            return Err(StorageError::conflict("function", function.name));
        }
        function.id = new_id();
        function.last_updated = Utc::now();
        let id = function.id.clone();
        functions.insert(id.clone(), function);
        Ok(id)
    }

    async fn update_function(
        &self,
        base: &str,
        id: &str,
        code: &str,
        trigger: &str,
    ) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        let function = partitions
            .get_mut(base)
            .and_then(|p| p.functions.get_mut(id))
            .ok_or_else(|| StorageError::not_found("function", id))?;
        function.code = code.to_string();
        function.trigger_topic = trigger.to_string();
        function.version += 1;
        function.last_updated = Utc::now();
        Ok(())
    }

    async fn get_function_by_name(&self, base: &str, name: &str) -> Result<FunctionInfo> {
        self.partitions
            .read()
            .await
            .get(base)
            .and_then(|p| p.functions.values().find(|f| f.name == name))
            .cloned()
            .ok_or_else(|| StorageError::not_found("function", name))
    }

    async fn list_functions(&self, base: &str) -> Result<Vec<FunctionInfo>> {
        validate_base_name(base)?;
        let mut functions: Vec<FunctionInfo> = self
            .partitions
            .read()
            .await
            .get(base)
            .map(|p| p.functions.values().cloned().collect())
            .unwrap_or_default();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(functions)
    }

    async fn delete_function(&self, base: &str, name: &str) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        let functions = partitions
            .get_mut(base)
            .map(|p| &mut p.functions)
            .ok_or_else(|| StorageError::not_found("function", name))?;
        let before = functions.len();
        functions.retain(|_, f| f.name != name);
        if functions.len() == before {
            return Err(StorageError::not_found("function", name));
        }
        Ok(())
    }
}
