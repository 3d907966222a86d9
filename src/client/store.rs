//! File-backed object store.
//!
//! Document layout (YAML or JSON, chosen by file extension):
//!
//! ```yaml
//! files:
//!   44d88612fea8a8f36de82e1278abb02f:
//!     type: file            # optional, defaults to the singular collection name
//!     attributes:
//!       size: 68
//!     relationships:
//!       contacted_ips: [1.2.3.4]
//! analyses:
//!   a-1:
//!     attributes: {status: completed}
//!     faults: [transient, transient]   # optional, see below
//! ```
//!
//! `faults` scripts service failures for one object: every fetch, patch or
//! delete of it consumes the first entry and fails with that error until
//! the list is empty.
//!
//! Mutations stay in memory until [`FileStore::save`] writes them back.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::{ClientError, Draft, ListQuery, Object, Page, Relationship, RemoteClient};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write store file '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML store document")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON store document")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredObject {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    relationships: BTreeMap<String, Relationship>,
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    faults: VecDeque<Fault>,
}

/// Scripted failure for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Fault {
    Transient,
    Unauthorized,
}

impl Fault {
    fn into_error(self, collection: &str, id: &str) -> ClientError {
        match self {
            Fault::Transient => {
                ClientError::Transient(format!("{collection}/{id} temporarily unavailable"))
            }
            Fault::Unauthorized => {
                ClientError::Unauthorized(format!("access to {collection}/{id} denied"))
            }
        }
    }
}

type Collections = BTreeMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }

    fn parse(self, raw: &str) -> Result<Collections, StoreError> {
        if raw.trim().is_empty() {
            return Ok(Collections::new());
        }
        Ok(match self {
            Format::Yaml => serde_yaml::from_str(raw)?,
            Format::Json => serde_json::from_str(raw)?,
        })
    }

    fn render(self, data: &Collections) -> Result<String, StoreError> {
        Ok(match self {
            Format::Yaml => serde_yaml::to_string(data)?,
            Format::Json => serde_json::to_string_pretty(data)?,
        })
    }
}

/// `files` -> `file`, `analyses` -> `analysis`.
fn singular(collection: &str) -> String {
    if let Some(stem) = collection.strip_suffix("yses") {
        format!("{stem}ysis")
    } else if let Some(stem) = collection.strip_suffix("sses") {
        format!("{stem}ss")
    } else if let Some(stem) = collection.strip_suffix('s') {
        stem.to_string()
    } else {
        collection.to_string()
    }
}

#[derive(Debug)]
pub struct FileStore {
    path: Option<PathBuf>,
    format: Format,
    data: RwLock<Collections>,
    latency: Duration,
    next_id: AtomicU64,
    dirty: AtomicBool,
}

impl FileStore {
    /// Load the document at `path`. A missing file yields an empty store that
    /// is created on the first [`save`](Self::save) after a mutation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let format = Format::of(path);
        let data = match std::fs::read_to_string(path) {
            Ok(raw) => format.parse(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "store file missing; starting empty");
                Collections::new()
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut store = Self::from_collections(data, format);
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// A store that lives only in memory, parsed from a YAML document.
    #[cfg(test)]
    pub fn from_yaml(raw: &str) -> Result<Self, StoreError> {
        Ok(Self::from_collections(Format::Yaml.parse(raw)?, Format::Yaml))
    }

    fn from_collections(data: Collections, format: Format) -> Self {
        // Generated ids continue after the highest numeric id already stored.
        let highest = data
            .values()
            .flat_map(|objects| objects.keys())
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            path: None,
            format,
            data: RwLock::new(data),
            latency: Duration::ZERO,
            next_id: AtomicU64::new(highest.saturating_add(1)),
            dirty: AtomicBool::new(false),
        }
    }

    /// Simulated per-request round-trip time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Persist mutations, if any, back to the file the store was opened from.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let rendered = {
            let data = self.data.read().unwrap_or_else(|e| e.into_inner());
            self.format.render(&data)?
        };
        std::fs::write(path, rendered).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "store saved");
        Ok(())
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Consume the next scripted fault of `collection/id`, if it has one.
    fn take_fault(&self, collection: &str, id: &str) -> Result<(), ClientError> {
        let pending = {
            let data = self.data.read().unwrap_or_else(|e| e.into_inner());
            data.get(collection)
                .and_then(|objects| objects.get(id))
                .is_some_and(|stored| !stored.faults.is_empty())
        };
        if !pending {
            return Ok(());
        }
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let fault = data
            .get_mut(collection)
            .and_then(|objects| objects.get_mut(id))
            .and_then(|stored| stored.faults.pop_front());
        match fault {
            Some(fault) => {
                debug!(collection, id, ?fault, "scripted fault");
                Err(fault.into_error(collection, id))
            }
            None => Ok(()),
        }
    }

    fn materialize(collection: &str, id: &str, stored: &StoredObject) -> Object {
        Object {
            id: id.to_string(),
            object_type: stored
                .object_type
                .clone()
                .unwrap_or_else(|| singular(collection)),
            attributes: stored.attributes.clone(),
            relationships: stored.relationships.clone(),
        }
    }

    fn matches(id: &str, stored: &StoredObject, filter: Option<&str>) -> bool {
        let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
            return true;
        };
        match filter.split_once('=') {
            Some((key, expected)) => match stored.attributes.get(key.trim()) {
                Some(Value::String(s)) => s == expected.trim(),
                Some(other) => other.to_string() == expected.trim(),
                None => false,
            },
            None => id.contains(filter),
        }
    }
}

#[async_trait]
impl RemoteClient for FileStore {
    async fn fetch(&self, collection: &str, id: &str) -> Result<Object, ClientError> {
        self.round_trip().await;
        self.take_fault(collection, id)?;
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(collection)
            .and_then(|objects| objects.get(id))
            .map(|stored| Self::materialize(collection, id, stored))
            .ok_or_else(|| ClientError::not_found(collection, id))
    }

    async fn create(&self, collection: &str, draft: Draft) -> Result<Object, ClientError> {
        self.round_trip().await;
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let objects = data.entry(collection.to_string()).or_default();
        let id = match draft.id {
            Some(id) if !id.trim().is_empty() => id,
            // Skip counter values taken by explicitly named objects.
            _ => loop {
                let candidate = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
                if !objects.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        if objects.contains_key(&id) {
            return Err(ClientError::Invalid(format!(
                "{collection}/{id} already exists"
            )));
        }
        let stored = StoredObject {
            object_type: None,
            attributes: draft.attributes,
            relationships: BTreeMap::new(),
            faults: VecDeque::new(),
        };
        let object = Self::materialize(collection, &id, &stored);
        objects.insert(id, stored);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(object)
    }

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), ClientError> {
        self.round_trip().await;
        self.take_fault(collection, id)?;
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let stored = data
            .get_mut(collection)
            .and_then(|objects| objects.get_mut(id))
            .ok_or_else(|| ClientError::not_found(collection, id))?;
        merge_attributes(&mut stored.attributes, attributes);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ClientError> {
        self.round_trip().await;
        self.take_fault(collection, id)?;
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.get_mut(collection)
            .and_then(|objects| objects.remove(id))
            .ok_or_else(|| ClientError::not_found(collection, id))?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page, ClientError> {
        self.round_trip().await;
        let offset = match query.cursor.as_deref() {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ClientError::Invalid(format!("malformed cursor '{raw}'")))?,
        };
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let Some(objects) = data.get(&query.collection) else {
            return Ok(Page::default());
        };

        let mut matching = objects
            .iter()
            .filter(|(id, stored)| Self::matches(id, stored, query.filter.as_deref()))
            .skip(offset);
        let page: Vec<Object> = matching
            .by_ref()
            .take(query.limit)
            .map(|(id, stored)| Self::materialize(&query.collection, id, stored))
            .collect();
        let more = matching.next().is_some();

        Ok(Page {
            cursor: more.then(|| (offset + page.len()).to_string()),
            objects: page,
        })
    }
}

/// Merge `patch` into `target`. Nested maps merge key by key, a null removes
/// the key at its level, anything else replaces.
fn merge_attributes(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(&key);
            }
            Value::Object(nested) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_attributes(existing, nested),
                _ => {
                    let mut fresh = Map::new();
                    merge_attributes(&mut fresh, nested);
                    target.insert(key, Value::Object(fresh));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}
