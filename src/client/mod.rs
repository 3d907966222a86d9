//! Remote object store collaborator.
//!
//! `RemoteClient` is the surface the commands consume: fetch-by-id, create,
//! patch, delete and paginated listing. The wire protocol behind it is not
//! this crate's concern; [`store::FileStore`] is the bundled implementation,
//! backed by a YAML/JSON document.
//!
//! Object -> flattened map (what the field filter and renderer see):
//!   `_id`, `_type`, every attribute, every relationship
//!   (one-to-one -> id or null, one-to-many -> list of ids).

pub mod store;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use store::{FileStore, StoreError};

/// Upper bound on objects requested per page while iterating.
pub const MAX_PAGE_SIZE: usize = 40;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// The service asked us to come back later.
    #[error("transient service error: {0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        ClientError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Related object ids. Untagged so `null`, `"id"` and `["a", "b"]` all parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Relationship {
    One(Option<String>),
    Many(Vec<String>),
}

impl Relationship {
    fn to_value(&self) -> Value {
        match self {
            Relationship::One(Some(id)) => Value::String(id.clone()),
            Relationship::One(None) => Value::Null,
            Relationship::Many(ids) => {
                Value::Array(ids.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub id: String,
    pub object_type: String,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, Relationship>,
}

impl Object {
    #[cfg(test)]
    pub fn new(id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            attributes: Map::new(),
            relationships: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Flatten into the nested map handed to the field filter and renderer.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("_id".into(), Value::String(self.id.clone()));
        map.insert("_type".into(), Value::String(self.object_type.clone()));
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.clone());
        }
        for (name, related) in &self.relationships {
            map.insert(name.clone(), related.to_value());
        }
        map
    }
}

/// An object about to be created. `id` is assigned by the store when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub id: Option<String>,
    pub attributes: Map<String, Value>,
}

impl Draft {
    /// Split a `_id` key (if any) out of a parsed document.
    pub fn from_map(mut attributes: Map<String, Value>) -> Self {
        let id = match attributes.remove("_id") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) | None => None,
        };
        Self { id, attributes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub collection: String,
    pub filter: Option<String>,
    pub limit: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub objects: Vec<Object>,
    /// Opaque continuation; `None` when the listing is exhausted.
    pub cursor: Option<String>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn fetch(&self, collection: &str, id: &str) -> Result<Object, ClientError>;

    async fn create(&self, collection: &str, draft: Draft) -> Result<Object, ClientError>;

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), ClientError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ClientError>;

    /// One page of at most `query.limit` objects starting at `query.cursor`.
    async fn list(&self, query: &ListQuery) -> Result<Page, ClientError>;
}

/// Walk pages until `query.limit` objects were produced or the listing ends.
///
/// Returns the cursor to resume from, if more objects remain.
pub async fn iterate<F>(
    client: &dyn RemoteClient,
    query: &ListQuery,
    mut each: F,
) -> Result<Option<String>, ClientError>
where
    F: FnMut(Object),
{
    let mut remaining = query.limit;
    let mut cursor = query.cursor.clone();

    while remaining > 0 {
        let page_query = ListQuery {
            limit: remaining.min(MAX_PAGE_SIZE),
            cursor: cursor.clone(),
            ..query.clone()
        };
        let page = client.list(&page_query).await?;
        tracing::debug!(
            collection = %query.collection,
            got = page.objects.len(),
            more = page.cursor.is_some(),
            "page"
        );
        remaining = remaining.saturating_sub(page.objects.len());
        let exhausted = page.objects.is_empty();
        page.objects.into_iter().for_each(&mut each);
        cursor = page.cursor;
        if cursor.is_none() || exhausted {
            break;
        }
    }

    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_map_flattens_relationships() {
        let mut obj = Object::new("abc", "file").with_attribute("size", json!(42));
        obj.relationships
            .insert("parent".into(), Relationship::One(Some("p1".into())));
        obj.relationships
            .insert("bundle".into(), Relationship::One(None));
        obj.relationships.insert(
            "contacted_ips".into(),
            Relationship::Many(vec!["1.1.1.1".into(), "8.8.8.8".into()]),
        );

        let map = obj.to_map();
        assert_eq!(
            Value::Object(map),
            json!({
                "_id": "abc",
                "_type": "file",
                "size": 42,
                "parent": "p1",
                "bundle": null,
                "contacted_ips": ["1.1.1.1", "8.8.8.8"]
            })
        );
    }

    #[test]
    fn relationship_parses_all_shapes() {
        let one: Relationship = serde_json::from_value(json!("x")).unwrap();
        let none: Relationship = serde_json::from_value(json!(null)).unwrap();
        let many: Relationship = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(one, Relationship::One(Some("x".into())));
        assert_eq!(none, Relationship::One(None));
        assert_eq!(many, Relationship::Many(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn draft_takes_id_out_of_attributes() {
        let map = json!({"_id": "u1", "url": "http://x"})
            .as_object()
            .cloned()
            .unwrap();
        let draft = Draft::from_map(map);
        assert_eq!(draft.id.as_deref(), Some("u1"));
        assert!(!draft.attributes.contains_key("_id"));
        assert_eq!(draft.attributes.get("url"), Some(&json!("http://x")));
    }

    #[test]
    fn error_classification() {
        assert!(ClientError::not_found("files", "x").is_not_found());
        assert!(ClientError::Transient("busy".into()).is_transient());
        assert!(!ClientError::Unauthorized("key".into()).is_not_found());
    }
}
