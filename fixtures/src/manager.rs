use crate::set::FixtureSet;
use crate::store::DocumentStore;
use errors::DataError;
use futures_util::future::try_join_all;
use std::collections::BTreeMap;

/// Inserted document count per collection.
pub type InsertCounts = BTreeMap<String, usize>;

/// Loads, cleans, replays and drops fixture data.
///
/// Multi-collection operations run concurrently and fail on the first
/// failure. Nothing is rolled back: inserts or drops that completed before a
/// failure stay applied.
pub struct FixtureManager<S> {
    store: S,
    current: Option<FixtureSet>
}

impl<S: DocumentStore> FixtureManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: None
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fixture set `refresh` would replay.
    pub fn current(&self) -> Option<&FixtureSet> {
        self.current.as_ref()
    }

    /// Loads `data`, first dropping its collections unless
    /// `retain_previous` is set.
    ///
    /// `data` becomes the current fixture set as soon as the inserts are
    /// issued, so a partially failed load is still what `refresh` replays.
    /// An empty `data` without `retain_previous` drops every collection.
    pub async fn load(
        &mut self,
        data: FixtureSet,
        retain_previous: bool
    ) -> Result<InsertCounts, DataError> {
        if !retain_previous {
            self.clean(&data).await?;
        }

        let store = &self.store;
        let inserts = data.iter().map(|(collection, documents)| async move {
            if documents.is_empty() {
                return Ok::<(String, usize), DataError>((collection.to_string(), 0));
            }
            let inserted = store.insert_many(collection, documents.to_vec()).await?;
            tracing::debug!(collection, inserted, "fixture documents inserted");
            Ok((collection.to_string(), inserted))
        });
        let pending = try_join_all(inserts);
        self.current = Some(data.clone());

        let counts = pending.await?;
        Ok(counts.into_iter().collect())
    }

    /// Replays the current fixture set onto freshly dropped collections.
    /// Returns `None` when there is nothing to replay.
    pub async fn refresh(&mut self) -> Result<Option<InsertCounts>, DataError> {
        match self.current.clone() {
            Some(data) if !data.is_empty() => self.load(data, false).await.map(Some),
            _ => {
                tracing::info!("fixture set is empty, nothing to refresh");
                Ok(None)
            }
        }
    }

    /// Drops the collections named in `data`, or every collection when
    /// `data` is empty. Missing collections are ignored.
    pub async fn clean(&mut self, data: &FixtureSet) -> Result<(), DataError> {
        self.current = None;
        if data.is_empty() {
            return self.drop_all().await;
        }
        self.drop_collections(data.collection_names().map(str::to_string).collect())
            .await
    }

    /// Drops the whole working database.
    pub async fn drop(&mut self) -> Result<(), DataError> {
        self.current = None;
        self.store.drop_database().await?;
        tracing::debug!(database = self.store.database_name(), "database dropped");
        Ok(())
    }

    /// Drops every collection currently in the database, one by one.
    pub async fn drop_all(&mut self) -> Result<(), DataError> {
        self.current = None;
        let collections = self.store.list_collections().await?;
        self.drop_collections(collections).await
    }

    async fn drop_collections(&self, collections: Vec<String>) -> Result<(), DataError> {
        let store = &self.store;
        let drops = collections.into_iter().map(|collection| async move {
            match store.drop_collection(&collection).await {
                Ok(()) => {
                    tracing::debug!(collection = %collection, "collection dropped");
                    Ok(())
                }
                Err(DataError::CollectionNotFound { .. }) => {
                    tracing::info!(collection = %collection, "collection not found, nothing to drop");
                    Ok(())
                }
                Err(e) => Err(e)
            }
        });
        try_join_all(drops).await?;
        Ok(())
    }
}
