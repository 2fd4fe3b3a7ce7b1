use errors::DataError;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collections of fixture documents keyed by collection name.
///
/// Document order within a collection is preserved; documents carry no
/// required identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureSet {
    collections: BTreeMap<String, Vec<Document>>
}

impl FixtureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `documents` to `collection`, builder style.
    pub fn with(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.insert(collection, documents);
        self
    }

    /// Replaces the documents of `collection`.
    pub fn insert(&mut self, collection: impl Into<String>, documents: Vec<Document>) {
        self.collections.insert(collection.into(), documents);
    }

    pub fn get(&self, collection: &str) -> Option<&[Document]> {
        self.collections.get(collection).map(Vec::as_slice)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.collections
            .iter()
            .map(|(name, documents)| (name.as_str(), documents.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Builds a fixture set from `{ "collection": [ {...}, ... ] }` JSON.
    ///
    /// Values follow MongoDB extended JSON, so `{"$oid": "..."}` becomes an
    /// ObjectId.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DataError> {
        let serde_json::Value::Object(map) = value else {
            return Err(invalid("top level must be an object of collections"));
        };

        let mut set = Self::new();
        for (collection, documents) in map {
            let serde_json::Value::Array(items) = documents else {
                return Err(invalid(&format!("{collection}: expected an array of documents")));
            };
            let documents = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| to_document(&collection, index, item))
                .collect::<Result<Vec<_>, _>>()?;
            set.insert(collection, documents);
        }
        Ok(set)
    }

    /// Parses [`FixtureSet::from_json`] input from a string.
    pub fn from_json_str(json: &str) -> Result<Self, DataError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| invalid(&e.to_string()))?;
        Self::from_json(value)
    }
}

impl FromIterator<(String, Vec<Document>)> for FixtureSet {
    fn from_iter<T: IntoIterator<Item = (String, Vec<Document>)>>(iter: T) -> Self {
        Self {
            collections: iter.into_iter().collect()
        }
    }
}

fn to_document(collection: &str, index: usize, item: serde_json::Value) -> Result<Document, DataError> {
    match Bson::try_from(item) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(invalid(&format!(
            "{collection}[{index}]: expected a document, found {:?}",
            other.element_type()
        ))),
        Err(e) => Err(invalid(&format!("{collection}[{index}]: {e}")))
    }
}

fn invalid(reason: &str) -> DataError {
    DataError::InvalidFixture {
        reason: reason.to_string()
    }
}
