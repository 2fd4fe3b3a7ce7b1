use crate::store::DocumentStore;
use async_trait::async_trait;
use errors::DataError;
use mongodb::bson::Document;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Vec<Document>>,
    operations: Vec<String>
}

/// In-memory [`DocumentStore`] recording every operation it serves.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_inserts_into: Option<String>,
    fail_drops: bool,
    missing_drop_is_error: bool
}

impl MemoryStore {
    pub fn failing_inserts_into(collection: &str) -> Self {
        Self {
            fail_inserts_into: Some(collection.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_drops() -> Self {
        Self {
            fail_drops: true,
            ..Self::default()
        }
    }

    /// Reports dropping a missing collection as an error, like servers
    /// before 7.0.
    pub fn legacy_drop_semantics() -> Self {
        Self {
            missing_drop_is_error: true,
            ..Self::default()
        }
    }

    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        let mut state = self.state.lock().unwrap();
        state.collections.insert(collection.to_string(), documents);
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let state = self.state.lock().unwrap();
        state.collections.get(collection).cloned().unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.collections.keys().cloned().collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state.lock().unwrap().operations.clear();
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        "memory"
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>
    ) -> Result<usize, DataError> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("insert:{collection}"));
        if self.fail_inserts_into.as_deref() == Some(collection) {
            return Err(DataError::Insert {
                collection: collection.to_string(),
                reason: "write rejected".to_string()
            });
        }
        let count = documents.len();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(count)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DataError> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("drop:{collection}"));
        if self.fail_drops {
            return Err(DataError::Drop {
                collection: collection.to_string(),
                reason: "not authorized".to_string()
            });
        }
        match state.collections.remove(collection) {
            None if self.missing_drop_is_error => Err(DataError::CollectionNotFound {
                collection: collection.to_string()
            }),
            _ => Ok(())
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>, DataError> {
        let mut state = self.state.lock().unwrap();
        state.operations.push("list_collections".to_string());
        Ok(state.collections.keys().cloned().collect())
    }

    async fn drop_database(&self) -> Result<(), DataError> {
        let mut state = self.state.lock().unwrap();
        state.operations.push("drop_database".to_string());
        state.collections.clear();
        Ok(())
    }
}
