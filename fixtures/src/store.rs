use async_trait::async_trait;
use errors::DataError;
use mongodb::Database;
use mongodb::bson::Document;
use mongodb::error::{Error as MongoError, ErrorKind};

/// Server error code for a missing namespace.
pub const NAMESPACE_NOT_FOUND: i32 = 26;

/// The per-database operations fixture management needs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn database_name(&self) -> &str;

    /// Inserts `documents` into `collection`, returning the inserted count.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>)
    -> Result<usize, DataError>;

    /// Drops `collection`; a missing collection is reported as
    /// [`DataError::CollectionNotFound`].
    async fn drop_collection(&self, collection: &str) -> Result<(), DataError>;

    async fn list_collections(&self) -> Result<Vec<String>, DataError>;

    /// Drops the whole database in one engine operation.
    async fn drop_database(&self) -> Result<(), DataError>;
}

/// [`DocumentStore`] over a live database handle.
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

fn is_namespace_not_found(error: &MongoError) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Command(command_error) if command_error.code == NAMESPACE_NOT_FOUND
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>
    ) -> Result<usize, DataError> {
        self.database
            .collection::<Document>(collection)
            .insert_many(documents)
            .await
            .map(|result| result.inserted_ids.len())
            .map_err(|e| DataError::Insert {
                collection: collection.to_string(),
                reason: e.to_string()
            })
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DataError> {
        match self.database.collection::<Document>(collection).drop().await {
            Ok(()) => Ok(()),
            Err(e) if is_namespace_not_found(&e) => Err(DataError::CollectionNotFound {
                collection: collection.to_string()
            }),
            Err(e) => Err(DataError::Drop {
                collection: collection.to_string(),
                reason: e.to_string()
            })
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>, DataError> {
        self.database
            .list_collection_names()
            .await
            .map_err(|e| DataError::ListCollections {
                database: self.database.name().to_string(),
                reason: e.to_string()
            })
    }

    async fn drop_database(&self) -> Result<(), DataError> {
        self.database
            .drop()
            .await
            .map_err(|e| DataError::DropDatabase {
                database: self.database.name().to_string(),
                reason: e.to_string()
            })
    }
}
