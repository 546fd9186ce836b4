//! Write-through persistence for every mutation class.
//!
//! Two flavors exist for most mutations. Sync persisters write the store
//! first and update memory only after the store acknowledges, threading
//! the new commit id into the book's CID index. Async persisters update
//! memory first and fire the write through the store's sink; CID tracking
//! is skipped for async writes by design — memory is authoritative during
//! execution and the next sync read reconciles.
//!
//! Batch persisters are all-or-nothing in memory: per-op errors are
//! aggregated into one error naming the failure count and memory is left
//! unchanged, preserving "memory reflects persisted state".

mod agent;
mod chapter;
mod loader;
mod ocr;
mod ops;
mod reset;
mod toc;

pub use chapter::{ChapterClassification, ChapterPolish};
pub use loader::{load_book, load_toc_entries, EntryFilter};

use std::sync::Arc;

use thiserror::Error;

use crate::state::{BookState, StateError};
use crate::store::{self, StateStore, StoreError, WriteAck};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no document store configured")]
    StoreNotConfigured,
    #[error("no table of contents document exists yet")]
    NoTocDoc,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{failed} of {total} batch operations failed: {detail}")]
    PartialBatch {
        failed: usize,
        total: usize,
        detail: String,
    },
    #[error("validation: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Fetch the store handle or fail with the missing-collaborator error.
pub(crate) fn require_store(book: &BookState) -> Result<Arc<dyn StateStore>> {
    book.store().cloned().ok_or(PersistError::StoreNotConfigured)
}

/// Collapse batch results into one error naming the failed ops, or `Ok`
/// when every sub-op succeeded.
pub(crate) fn aggregate_results(
    results: &[store::Result<WriteAck>],
    what: &str,
) -> Result<()> {
    let failures: Vec<String> = results
        .iter()
        .enumerate()
        .filter_map(|(idx, result)| result.as_ref().err().map(|e| format!("{what}[{idx}]: {e}")))
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    Err(PersistError::PartialBatch {
        failed: failures.len(),
        total: results.len(),
        detail: failures.join("; "),
    })
}
