//! Table-actor storage mapping (§4.G): base rows and secondary indexes
//! with baseline-driven differential updates, layered over an abstract
//! partitioned key/value persistence service.

mod search;

pub use search::{Condition, Op, SearchSpec};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::lock::SharedExclusiveLock;
use crate::wire::{self, Envelope, Value};

const MAX_CONCURRENT_RESOLUTIONS: usize = 5;

/// A persistence-layer key: an ordered path of string segments.
pub type KeyPath = Vec<String>;

/// One row's identity within the persistence service's partition scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub partition_key: KeyPath,
    pub sort_key: KeyPath,
}

/// A load request against the persistence service.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub partition_key: KeyPath,
    pub sort_key: KeyPath,
    pub projection_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub value: Option<Vec<u8>>,
    pub version: Option<String>,
}

/// A query/search request compiled from a `SearchSpec` (see `search`).
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub partition_key: KeyPath,
    pub sort_key_from: KeyPath,
    pub sort_key_to: KeyPath,
    pub sort_key_to_match: MatchMode,
    pub filter_expression: Option<FilterExpr>,
    pub filter_field_base: String,
    pub filter_sort_key_offset: usize,
    pub projection_filter: Vec<String>,
    pub continuation_token: Option<String>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Strict,
    Loose,
}

/// A residual predicate evaluated by the persistence layer against the
/// decoded value, field-rooted at `filter_field_base`.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Eq { field: String, value: Value },
    Contains { field: String, needle: String, case_insensitive: bool },
}

#[derive(Debug, Clone)]
pub struct QueryItem {
    pub sort_key: KeyPath,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub items: Vec<QueryItem>,
    pub continuation_token: Option<String>,
}

/// One mutation to apply as part of a `store_batch` call.
#[derive(Debug, Clone)]
pub struct StoreItem {
    pub partition_key: KeyPath,
    pub sort_key: KeyPath,
    pub value: Option<Vec<u8>>,
    pub version: Option<String>,
    pub identifier: String,
}

#[derive(Debug, Clone, Default)]
pub struct StoreBatchResponse {
    pub unprocessed_items: Vec<String>,
}

/// The abstract partitioned KV persistence service this mapping is
/// layered over (§6). An external collaborator — only the operations the
/// core consumes are specified here.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self, request: LoadRequest) -> Result<LoadResponse, StorageError>;
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StorageError>;
    async fn store_batch(&self, items: Vec<StoreItem>) -> Result<StoreBatchResponse, StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("put had unprocessed items, retry (baseline makes this safe)")]
    TableError,
    #[error("wire error: {0}")]
    Wire(#[from] wire::WireError),
}

/// One secondary index contribution for a row being put.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: String,
    pub keys: Vec<String>,
    pub data: IndexMap<String, Value>,
}

/// A row's baseline: the index entries that existed for it as of the last
/// successful put, used to compute a differential update on the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    pub entries: Vec<BaselineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineEntry {
    pub index_name: String,
    pub key_tuple: Vec<String>,
    pub content_hash: String,
}

/// Request to persist (or, with `data: None`, delete) one row and its
/// secondary index entries.
pub struct PutRequest {
    pub id: Vec<String>,
    pub data: Option<IndexMap<String, Value>>,
    pub indexes: Vec<IndexEntry>,
    pub baseline: Option<Baseline>,
}

fn content_hash(keys: &[String], data: &IndexMap<String, Value>) -> Result<String, StorageError> {
    let encoded = wire::serialize(&Value::Map(data.clone()), Envelope::Cj, 64)?;
    let mut hasher = Sha1::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\u{1}");
    }
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

/// Layers a table abstraction (base rows + secondary indexes) over a
/// [`Persistence`] service, serializing row bodies with the wire codec
/// (§4.A) and gating concurrent action dispatch with a shared lock
/// (§4.C); exclusive upgrades are reserved for compaction, never taken by
/// ordinary put/get/search.
///
/// One `TableActorStorage` instance backs one table actor, identified by
/// `actor_id`; its partition is fixed for the instance's lifetime (every
/// row and index entry it owns lives in that one partition — row
/// identity only ever appears in the sort key, per §4.G).
pub struct TableActorStorage {
    partition_key: KeyPath,
    persistence: Arc<dyn Persistence>,
    lock: SharedExclusiveLock,
}

impl TableActorStorage {
    pub fn new(table_name: impl Into<String>, actor_id: &[String], shard: u32, persistence: Arc<dyn Persistence>) -> Self {
        let mut pk = vec![table_name.into(), actor_id.len().to_string()];
        pk.extend(actor_id.iter().cloned());
        pk.push(shard.to_string());
        Self { partition_key: pk, persistence, lock: SharedExclusiveLock::new() }
    }

    fn base_sort_key(id: &[String]) -> KeyPath {
        let mut sk = vec!["base".to_string()];
        sk.extend(id.iter().cloned());
        sk
    }

    fn index_sort_key(index_name: &str, keys: &[String], row_id: &[String], content_hash: &str) -> KeyPath {
        let mut sk = vec!["index".to_string(), index_name.to_string()];
        sk.extend(keys.iter().cloned());
        sk.push(serde_json::to_string(row_id).unwrap_or_default());
        sk.push(content_hash.to_string());
        sk
    }

    /// §4.G put: fetch (or accept caller-supplied) baseline, diff against
    /// the new index entries, write inserts/deletes plus the base row in
    /// one batch (base row last, so a crash mid-batch only ever leaves
    /// orphan index rows — corrected on the next baseline reconciliation).
    pub async fn put(&self, request: PutRequest) -> Result<(), StorageError> {
        let token = uuid::Uuid::new_v4().to_string();
        self.lock.begin_shared(&token, &[]).await.map_err(|e| StorageError::Persistence(e.to_string()))?;
        let result = self.put_locked(request).await;
        self.lock.end_shared(&token).ok();
        result
    }

    async fn put_locked(&self, request: PutRequest) -> Result<(), StorageError> {
        let pk = self.partition_key.clone();
        let base_sk = Self::base_sort_key(&request.id);

        let baseline = match request.baseline {
            Some(b) => b,
            None => self.load_baseline(&pk, &base_sk).await?,
        };

        let mut new_entries = Vec::new();
        if let Some(data) = &request.data {
            let _ = data;
            for idx in &request.indexes {
                let hash = content_hash(&idx.keys, &idx.data)?;
                new_entries.push(BaselineEntry { index_name: idx.name.clone(), key_tuple: idx.keys.clone(), content_hash: hash });
            }
        }

        let to_insert: Vec<&BaselineEntry> = new_entries
            .iter()
            .filter(|e| !baseline.entries.iter().any(|b| b == *e))
            .collect();
        let to_delete: Vec<&BaselineEntry> = baseline
            .entries
            .iter()
            .filter(|b| !new_entries.iter().any(|e| e == *b))
            .collect();

        let mut items = Vec::new();
        for entry in &to_insert {
            let idx = request.indexes.iter().find(|i| i.name == entry.index_name && i.keys == entry.key_tuple).unwrap();
            let sk = Self::index_sort_key(&entry.index_name, &entry.key_tuple, &request.id, &entry.content_hash);
            let value = wire::serialize(&Value::Map(idx.data.clone()), Envelope::Cj, 64)?;
            items.push(StoreItem {
                partition_key: pk.clone(),
                sort_key: sk,
                value: Some(value),
                version: None,
                identifier: format!("index-insert-{}", entry.index_name),
            });
        }
        for entry in &to_delete {
            let sk = Self::index_sort_key(&entry.index_name, &entry.key_tuple, &request.id, &entry.content_hash);
            items.push(StoreItem {
                partition_key: pk.clone(),
                sort_key: sk,
                value: None,
                version: None,
                identifier: format!("index-delete-{}", entry.index_name),
            });
        }

        let base_value = match &request.data {
            Some(data) => {
                let mut envelope = Value::map();
                envelope.insert("data".to_string(), Value::Map(data.clone()));
                envelope.insert(
                    "baseline".to_string(),
                    Value::List(
                        new_entries
                            .iter()
                            .map(|e| {
                                let mut m = Value::map();
                                m.insert("indexName".to_string(), Value::Str(e.index_name.clone()));
                                m.insert("keyTuple".to_string(), Value::List(e.key_tuple.iter().map(|k| Value::Str(k.clone())).collect()));
                                m.insert("contentHash".to_string(), Value::Str(e.content_hash.clone()));
                                Value::Map(m)
                            })
                            .collect(),
                    ),
                );
                Some(wire::serialize(&Value::Map(envelope), Envelope::Cj, 64)?)
            }
            None => None,
        };
        items.push(StoreItem {
            partition_key: pk.clone(),
            sort_key: base_sk.clone(),
            value: base_value,
            version: None,
            identifier: "base".to_string(),
        });

        let response = self.persistence.store_batch(items).await?;
        if !response.unprocessed_items.is_empty() {
            return Err(StorageError::TableError);
        }
        Ok(())
    }

    async fn load_baseline(&self, pk: &[String], base_sk: &[String]) -> Result<Baseline, StorageError> {
        let loaded = self
            .persistence
            .load(LoadRequest {
                partition_key: pk.to_vec(),
                sort_key: base_sk.to_vec(),
                projection_filter: Some(vec!["+baseline".to_string()]),
            })
            .await?;
        let Some(bytes) = loaded.value else {
            return Ok(Baseline::default());
        };
        let decoded = wire::deserialize(&bytes, false)?;
        let Some(map) = decoded.as_map() else {
            return Ok(Baseline::default());
        };
        let Some(Value::List(items)) = map.get("baseline") else {
            return Ok(Baseline::default());
        };
        let mut entries = Vec::new();
        for item in items {
            let Some(m) = item.as_map() else { continue };
            let (Some(name), Some(key_tuple), Some(hash)) = (
                m.get("indexName").and_then(Value::as_str),
                m.get("keyTuple"),
                m.get("contentHash").and_then(Value::as_str),
            ) else {
                continue;
            };
            let Value::List(keys) = key_tuple else { continue };
            entries.push(BaselineEntry {
                index_name: name.to_string(),
                key_tuple: keys.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                content_hash: hash.to_string(),
            });
        }
        Ok(Baseline { entries })
    }

    /// §4.G get: load the base row and return its `data` field.
    pub async fn get(&self, id: &[String]) -> Result<Option<IndexMap<String, Value>>, StorageError> {
        let token = uuid::Uuid::new_v4().to_string();
        self.lock.begin_shared(&token, &[]).await.map_err(|e| StorageError::Persistence(e.to_string()))?;
        let pk = self.partition_key.clone();
        let sk = Self::base_sort_key(id);
        let loaded = self.persistence.load(LoadRequest { partition_key: pk, sort_key: sk, projection_filter: None }).await;
        self.lock.end_shared(&token).ok();
        let loaded = loaded?;
        let Some(bytes) = loaded.value else { return Ok(None) };
        let decoded = wire::deserialize(&bytes, false)?;
        let Some(map) = decoded.as_map() else { return Ok(None) };
        Ok(map.get("data").and_then(Value::as_map).cloned())
    }

    /// §4.G search: compile `spec` into a sort-key range plus residual
    /// filter, issue the query, and (when searching a secondary index)
    /// resolve each hit back to its primary row with bounded concurrency.
    pub async fn search(&self, spec: &SearchSpec) -> Result<Vec<(Vec<String>, IndexMap<String, Value>)>, StorageError> {
        let pk = self.partition_key.clone();
        let request = spec.compile(&pk);
        let response = self.persistence.query(request).await?;

        match &spec.index {
            None => {
                let mut out = Vec::new();
                for item in response.items {
                    let Some(bytes) = item.value else { continue };
                    let decoded = wire::deserialize(&bytes, false)?;
                    let Some(map) = decoded.as_map() else { continue };
                    let Some(data) = map.get("data").and_then(Value::as_map).cloned() else { continue };
                    let row_id = item.sort_key[1..].to_vec();
                    out.push((row_id, data));
                }
                Ok(out)
            }
            Some(_) => {
                let row_ids: Vec<Vec<String>> = response
                    .items
                    .iter()
                    .filter_map(|item| {
                        item.sort_key
                            .iter()
                            .rev()
                            .nth(1)
                            .and_then(|json| serde_json::from_str::<Vec<String>>(json).ok())
                    })
                    .collect();
                let resolved: Vec<Option<(Vec<String>, IndexMap<String, Value>)>> = stream::iter(row_ids)
                    .map(|row_id| async move {
                        let data = self.get(&row_id).await.ok().flatten();
                        data.map(|d| (row_id, d))
                    })
                    .buffer_unordered(MAX_CONCURRENT_RESOLUTIONS)
                    .collect()
                    .await;
                Ok(resolved.into_iter().flatten().collect())
            }
        }
    }
}

/// Rewrite a caller-supplied `['+a','-b',...]` projection list to operate
/// under the `data` subfield, per §4.G: prepend `data.` to each entry,
/// then append `-data.*` / `+*` so unspecified data fields drop while
/// metadata (baseline, etc.) survives.
pub fn rewrite_projection(filters: &[String]) -> Vec<String> {
    let mut out: Vec<String> = filters
        .iter()
        .map(|f| {
            let (sign, field) = f.split_at(1);
            format!("{sign}data.{field}")
        })
        .collect();
    out.push("-data.*".to_string());
    out.push("+*".to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct MemoryPersistence {
        rows: AsyncMutex<HashMap<(KeyPath, KeyPath), Vec<u8>>>,
    }

    #[async_trait]
    impl Persistence for MemoryPersistence {
        async fn load(&self, request: LoadRequest) -> Result<LoadResponse, StorageError> {
            let rows = self.rows.lock().await;
            let value = rows.get(&(request.partition_key, request.sort_key)).cloned();
            Ok(LoadResponse { value, version: None })
        }

        async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StorageError> {
            let rows = self.rows.lock().await;
            let mut items: Vec<QueryItem> = rows
                .iter()
                .filter(|((pk, sk), _)| {
                    pk == &request.partition_key
                        && sk >= &request.sort_key_from
                        && match request.sort_key_to_match {
                            MatchMode::Strict => sk <= &request.sort_key_to,
                            MatchMode::Loose => sk.iter().zip(request.sort_key_to.iter()).all(|(a, b)| a == b),
                        }
                })
                .map(|((_, sk), v)| QueryItem { sort_key: sk.clone(), value: Some(v.clone()) })
                .collect();
            items.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
            Ok(QueryResponse { items, continuation_token: None })
        }

        async fn store_batch(&self, items: Vec<StoreItem>) -> Result<StoreBatchResponse, StorageError> {
            let mut rows = self.rows.lock().await;
            for item in items {
                let key = (item.partition_key, item.sort_key);
                match item.value {
                    Some(v) => {
                        rows.insert(key, v);
                    }
                    None => {
                        rows.remove(&key);
                    }
                }
            }
            Ok(StoreBatchResponse::default())
        }
    }

    fn data(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_data() {
        let persistence = Arc::new(MemoryPersistence::default());
        let storage = TableActorStorage::new("t", &["actor1".to_string()], 1, persistence);
        storage
            .put(PutRequest {
                id: vec!["k".into()],
                data: Some(data(&[("x", Value::Int(1))])),
                indexes: vec![IndexEntry { name: "i".into(), keys: vec!["1".into()], data: data(&[("y", Value::Int(2))]) }],
                baseline: None,
            })
            .await
            .unwrap();

        let fetched = storage.get(&["k".to_string()]).await.unwrap().unwrap();
        assert_eq!(fetched.get("x"), Some(&Value::Int(1)));

        let hits = storage.search(&SearchSpec::on_index("i", vec![Condition::eq("keys.0", Value::Str("1".into()))])).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn second_put_removes_stale_index_entries() {
        let persistence = Arc::new(MemoryPersistence::default());
        let storage = TableActorStorage::new("t", &["actor1".to_string()], 1, persistence);
        storage
            .put(PutRequest {
                id: vec!["k".into()],
                data: Some(data(&[("x", Value::Int(1))])),
                indexes: vec![IndexEntry { name: "i".into(), keys: vec!["1".into()], data: data(&[("y", Value::Int(2))]) }],
                baseline: None,
            })
            .await
            .unwrap();

        storage
            .put(PutRequest {
                id: vec!["k".into()],
                data: Some(data(&[("x", Value::Int(2))])),
                indexes: vec![IndexEntry { name: "i".into(), keys: vec!["2".into()], data: data(&[("y", Value::Int(3))]) }],
                baseline: None,
            })
            .await
            .unwrap();

        let fetched = storage.get(&["k".to_string()]).await.unwrap().unwrap();
        assert_eq!(fetched.get("x"), Some(&Value::Int(2)));

        let old_hits = storage.search(&SearchSpec::on_index("i", vec![Condition::eq("keys.0", Value::Str("1".into()))])).await.unwrap();
        assert!(old_hits.is_empty());
    }

    #[test]
    fn projection_rewrite_preserves_metadata() {
        let rewritten = rewrite_projection(&["+a".to_string(), "-b".to_string()]);
        assert_eq!(rewritten, vec!["+data.a", "-data.b", "-data.*", "+*"]);
    }
}
