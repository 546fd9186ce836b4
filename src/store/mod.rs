//! Persistence abstraction over the content-addressed document store.
//!
//! The pipeline never talks to a concrete database; it issues typed
//! queries and write operations against the [`StateStore`] trait. Every
//! mutation returns a fresh commit id (CID) that callers thread back into
//! the book's CID index for audit trails. [`MemoryStore`] backs tests and
//! local snapshot files.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Collection names used by the pipeline.
pub mod collections {
    pub const BOOK: &str = "Book";
    pub const TOC: &str = "Toc";
    pub const PAGE: &str = "Page";
    pub const OCR_RESULT: &str = "OcrResult";
    pub const TOC_ENTRY: &str = "TocEntry";
    pub const CHAPTER: &str = "Chapter";
    pub const AGENT_STATE: &str = "AgentState";
    pub const AGENT_RUN: &str = "AgentRun";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Backend(String),
    #[error("document not found: {collection}/{doc_id}")]
    NotFound { collection: String, doc_id: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Acknowledgement of a single committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub doc_id: String,
    pub cid: String,
}

/// One write operation against a collection.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Create {
        collection: &'static str,
        doc: Value,
    },
    Update {
        collection: &'static str,
        doc_id: String,
        fields: Value,
    },
    Delete {
        collection: &'static str,
        doc_id: String,
    },
}

impl StoreOp {
    pub fn create(collection: &'static str, doc: Value) -> Self {
        Self::Create { collection, doc }
    }

    pub fn update(collection: &'static str, doc_id: impl Into<String>, fields: Value) -> Self {
        Self::Update {
            collection,
            doc_id: doc_id.into(),
            fields,
        }
    }

    pub fn delete(collection: &'static str, doc_id: impl Into<String>) -> Self {
        Self::Delete {
            collection,
            doc_id: doc_id.into(),
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    pub fn doc_id(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => None,
            Self::Update { doc_id, .. } | Self::Delete { doc_id, .. } => Some(doc_id),
        }
    }
}

/// Sort direction for [`DocQuery::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// A typed read against one collection: equality filters, optional
/// ordering, optional limit. The backend interprets it.
#[derive(Debug, Clone)]
pub struct DocQuery {
    pub collection: &'static str,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortDir)>,
    pub limit: Option<usize>,
}

impl DocQuery {
    pub fn collection(collection: &'static str) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), SortDir::Asc));
        self
    }

    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), SortDir::Desc));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// One document returned by a query.
#[derive(Debug, Clone)]
pub struct DocResult {
    pub doc_id: String,
    /// Commit id of the version read.
    pub cid: String,
    pub fields: Map<String, Value>,
}

impl DocResult {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn u32_field(&self, name: &str) -> Option<u32> {
        self.fields
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }
}

/// The document store contract.
///
/// Mutations commit a new document version and return its CID. `send` is
/// fire-and-forget through the store's batching sink; it must never fail
/// inline. Cancellation is future-native: dropping an in-flight call
/// abandons it.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Run a read query.
    async fn execute(&self, query: DocQuery) -> Result<Vec<DocResult>>;

    /// Enqueue an async write through the sink.
    fn send(&self, op: StoreOp);

    /// Blocking write, returns the committed doc id and CID.
    async fn send_sync(&self, op: StoreOp) -> Result<WriteAck>;

    /// Batched blocking write. Each result carries its own error so the
    /// caller can detect partial failure.
    async fn send_many_sync(&self, ops: Vec<StoreOp>) -> Vec<Result<WriteAck>>;

    /// Atomically find-or-create by filter, then apply `update` (or create
    /// from `create` when no document matches).
    async fn upsert_with_version(
        &self,
        collection: &'static str,
        filters: Vec<(String, Value)>,
        create: Value,
        update: Value,
    ) -> Result<WriteAck>;

    /// Update an existing document, returning the new CID.
    async fn update_with_version(
        &self,
        collection: &'static str,
        doc_id: &str,
        fields: Value,
    ) -> Result<WriteAck>;
}
