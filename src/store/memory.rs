//! In-memory document store with content-addressed commit ids.
//!
//! Backs the test suite and local snapshot files. Commit ids are derived
//! from a SHA-256 over (doc id, revision, serialized fields), so any two
//! distinct versions of a document get distinct CIDs. Write failures can
//! be injected per collection for partial-batch tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{DocQuery, DocResult, Result, SortDir, StateStore, StoreError, StoreOp, WriteAck};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    revision: u64,
    cid: String,
    fields: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    collections: BTreeMap<String, BTreeMap<String, StoredDoc>>,
    next_id: u64,
}

/// In-memory [`StateStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, BTreeMap<String, StoredDoc>>>,
    next_id: AtomicU64,
    /// (collection, remaining writes until failure). A rule with count n
    /// fails the n-th write to that collection, then clears itself.
    failures: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot previously written by [`MemoryStore::save_to_path`].
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        let store = Self::new();
        *store.docs.lock().expect("store lock poisoned") = snapshot.collections;
        store.next_id.store(snapshot.next_id, Ordering::SeqCst);
        Ok(store)
    }

    /// Write the full store contents to a JSON snapshot file.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            collections: self.docs.lock().expect("store lock poisoned").clone(),
            next_id: self.next_id.load(Ordering::SeqCst),
        };
        let raw = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Arrange for the `nth` write (1-based) to `collection` to fail.
    /// Counting starts now; the rule clears once it fires.
    pub fn fail_nth_write(&self, collection: &str, nth: u64) {
        if nth == 0 {
            return;
        }
        self.failures
            .lock()
            .expect("store lock poisoned")
            .insert(collection.to_string(), nth);
    }

    /// Number of documents currently stored in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.docs
            .lock()
            .expect("store lock poisoned")
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Read one document's fields directly (test helper).
    pub fn get_doc(&self, collection: &str, doc_id: &str) -> Option<Map<String, Value>> {
        self.docs
            .lock()
            .expect("store lock poisoned")
            .get(collection)
            .and_then(|c| c.get(doc_id))
            .map(|d| d.fields.clone())
    }

    fn next_doc_id(&self, collection: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", collection.to_lowercase())
    }

    fn compute_cid(doc_id: &str, revision: u64, fields: &Map<String, Value>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(revision.to_be_bytes());
        hasher.update(Value::Object(fields.clone()).to_string().as_bytes());
        let digest = hasher.finalize();
        format!("cid-{}", &hex::encode(digest)[..16])
    }

    fn check_failure(&self, collection: &str) -> Result<()> {
        let mut failures = self.failures.lock().expect("store lock poisoned");
        if let Some(remaining) = failures.get_mut(collection) {
            *remaining -= 1;
            if *remaining == 0 {
                failures.remove(collection);
                return Err(StoreError::Backend(format!(
                    "injected write failure on {collection}"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, op: StoreOp) -> Result<WriteAck> {
        self.check_failure(op.collection())?;
        let mut docs = self.docs.lock().expect("store lock poisoned");
        match op {
            StoreOp::Create { collection, doc } => {
                let fields = match doc {
                    Value::Object(map) => map,
                    other => {
                        return Err(StoreError::Backend(format!(
                            "create payload must be an object, got {other}"
                        )))
                    }
                };
                let doc_id = self.next_doc_id(collection);
                let cid = Self::compute_cid(&doc_id, 1, &fields);
                docs.entry(collection.to_string()).or_default().insert(
                    doc_id.clone(),
                    StoredDoc {
                        revision: 1,
                        cid: cid.clone(),
                        fields,
                    },
                );
                Ok(WriteAck { doc_id, cid })
            }
            StoreOp::Update {
                collection,
                doc_id,
                fields,
            } => {
                let updates = match fields {
                    Value::Object(map) => map,
                    other => {
                        return Err(StoreError::Backend(format!(
                            "update payload must be an object, got {other}"
                        )))
                    }
                };
                let collection_docs = docs.entry(collection.to_string()).or_default();
                let stored =
                    collection_docs
                        .get_mut(&doc_id)
                        .ok_or_else(|| StoreError::NotFound {
                            collection: collection.to_string(),
                            doc_id: doc_id.clone(),
                        })?;
                for (key, value) in updates {
                    if value.is_null() {
                        stored.fields.remove(&key);
                    } else {
                        stored.fields.insert(key, value);
                    }
                }
                stored.revision += 1;
                stored.cid = Self::compute_cid(&doc_id, stored.revision, &stored.fields);
                Ok(WriteAck {
                    doc_id,
                    cid: stored.cid.clone(),
                })
            }
            StoreOp::Delete { collection, doc_id } => {
                let collection_docs = docs.entry(collection.to_string()).or_default();
                let removed = collection_docs
                    .remove(&doc_id)
                    .ok_or_else(|| StoreError::NotFound {
                        collection: collection.to_string(),
                        doc_id: doc_id.clone(),
                    })?;
                Ok(WriteAck {
                    doc_id,
                    cid: removed.cid,
                })
            }
        }
    }
}

fn matches(doc_id: &str, fields: &Map<String, Value>, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(name, expected)| {
        if name == "_id" {
            return expected.as_str() == Some(doc_id);
        }
        fields
            .get(name)
            .map(|actual| actual == expected)
            .unwrap_or(false)
    })
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(O::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => O::Less,
        (None, Some(_)) => O::Greater,
        _ => O::Equal,
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn execute(&self, query: DocQuery) -> Result<Vec<DocResult>> {
        let docs = self.docs.lock().expect("store lock poisoned");
        let mut results: Vec<DocResult> = docs
            .get(query.collection)
            .map(|collection| {
                collection
                    .iter()
                    .filter(|(doc_id, doc)| matches(doc_id, &doc.fields, &query.filters))
                    .map(|(doc_id, doc)| DocResult {
                        doc_id: doc_id.clone(),
                        cid: doc.cid.clone(),
                        fields: doc.fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, dir)) = &query.order_by {
            results.sort_by(|a, b| {
                let ord = compare_field(a.fields.get(field), b.fields.get(field));
                match dir {
                    SortDir::Asc => ord,
                    SortDir::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn send(&self, op: StoreOp) {
        // The sink applies immediately here; a real backend batches.
        if let Err(e) = self.apply(op) {
            debug!("async store write dropped: {e}");
        }
    }

    async fn send_sync(&self, op: StoreOp) -> Result<WriteAck> {
        self.apply(op)
    }

    async fn send_many_sync(&self, ops: Vec<StoreOp>) -> Vec<Result<WriteAck>> {
        ops.into_iter().map(|op| self.apply(op)).collect()
    }

    async fn upsert_with_version(
        &self,
        collection: &'static str,
        filters: Vec<(String, Value)>,
        create: Value,
        update: Value,
    ) -> Result<WriteAck> {
        let existing = {
            let docs = self.docs.lock().expect("store lock poisoned");
            docs.get(collection).and_then(|c| {
                c.iter()
                    .find(|(doc_id, doc)| matches(doc_id, &doc.fields, &filters))
                    .map(|(doc_id, _)| doc_id.clone())
            })
        };
        match existing {
            Some(doc_id) => self.apply(StoreOp::update(collection, doc_id, update)),
            None => self.apply(StoreOp::create(collection, create)),
        }
    }

    async fn update_with_version(
        &self,
        collection: &'static str,
        doc_id: &str,
        fields: Value,
    ) -> Result<WriteAck> {
        self.apply(StoreOp::update(collection, doc_id, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::collections;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_query() {
        let store = MemoryStore::new();
        let ack = store
            .send_sync(StoreOp::create(
                collections::PAGE,
                json!({"book_id": "b1", "page_num": 1}),
            ))
            .await
            .unwrap();
        assert!(ack.doc_id.starts_with("page-"));

        let results = store
            .execute(DocQuery::collection(collections::PAGE).filter("book_id", "b1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].u32_field("page_num"), Some(1));
    }

    #[tokio::test]
    async fn update_bumps_cid() {
        let store = MemoryStore::new();
        let ack = store
            .send_sync(StoreOp::create(
                collections::BOOK,
                json!({"status": "pending"}),
            ))
            .await
            .unwrap();
        let ack2 = store
            .send_sync(StoreOp::update(
                collections::BOOK,
                ack.doc_id.clone(),
                json!({"status": "processing"}),
            ))
            .await
            .unwrap();
        assert_eq!(ack.doc_id, ack2.doc_id);
        assert_ne!(ack.cid, ack2.cid);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_filter() {
        let store = MemoryStore::new();
        let filters = vec![("unique_key".to_string(), json!("toc1:0"))];
        let first = store
            .upsert_with_version(
                collections::TOC_ENTRY,
                filters.clone(),
                json!({"unique_key": "toc1:0", "title": "One"}),
                json!({"title": "One"}),
            )
            .await
            .unwrap();
        let second = store
            .upsert_with_version(
                collections::TOC_ENTRY,
                filters,
                json!({"unique_key": "toc1:0", "title": "Two"}),
                json!({"title": "Two"}),
            )
            .await
            .unwrap();
        assert_eq!(first.doc_id, second.doc_id);
        assert_eq!(store.count(collections::TOC_ENTRY), 1);
        let doc = store.get_doc(collections::TOC_ENTRY, &first.doc_id).unwrap();
        assert_eq!(doc.get("title"), Some(&json!("Two")));
    }

    #[tokio::test]
    async fn injected_failure_hits_nth_write() {
        let store = MemoryStore::new();
        store.fail_nth_write(collections::CHAPTER, 2);
        let ops = vec![
            StoreOp::create(collections::CHAPTER, json!({"n": 1})),
            StoreOp::create(collections::CHAPTER, json!({"n": 2})),
            StoreOp::create(collections::CHAPTER, json!({"n": 3})),
        ];
        let results = store.send_many_sync(ops).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = MemoryStore::new();
        store
            .send_sync(StoreOp::create(
                collections::BOOK,
                json!({"title": "Moby-Dick"}),
            ))
            .await
            .unwrap();
        store.save_to_path(&path).unwrap();

        let restored = MemoryStore::load_from_path(&path).unwrap();
        assert_eq!(restored.count(collections::BOOK), 1);
        // id allocation continues past the snapshot
        let ack = restored
            .send_sync(StoreOp::create(collections::BOOK, json!({"title": "Other"})))
            .await
            .unwrap();
        assert_eq!(restored.count(collections::BOOK), 2);
        assert!(!ack.doc_id.is_empty());
    }

    #[tokio::test]
    async fn ordered_query_with_limit() {
        let store = MemoryStore::new();
        for n in [3, 1, 2] {
            store
                .send_sync(StoreOp::create(
                    collections::PAGE,
                    json!({"book_id": "b1", "page_num": n}),
                ))
                .await
                .unwrap();
        }
        let results = store
            .execute(
                DocQuery::collection(collections::PAGE)
                    .filter("book_id", "b1")
                    .order_asc("page_num")
                    .limit(2),
            )
            .await
            .unwrap();
        let nums: Vec<_> = results.iter().filter_map(|r| r.u32_field("page_num")).collect();
        assert_eq!(nums, vec![1, 2]);
    }
}
