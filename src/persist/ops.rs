//! Persisters for book status, metadata, operation flags, and stage
//! phase records.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::models::{BookMetadata, BookStatus};
use crate::state::{BookState, OpKind};
use crate::store::{collections, StoreOp};

use super::{require_store, PersistError, Result};

fn op_flag_doc(book: &BookState, op: OpKind) -> Value {
    let (started, complete, failed, retries) = book.op_flags(op);
    let [f_started, f_complete, f_failed, f_retries] = op.flag_fields();
    json!({
        f_started: started,
        f_complete: complete,
        f_failed: failed,
        f_retries: retries,
    })
}

fn metadata_doc(meta: &BookMetadata, fields: &[&str]) -> Value {
    let mut doc = Map::new();
    for field in fields {
        match *field {
            "title" => {
                doc.insert("title".into(), json!(meta.title));
            }
            "authors" => {
                doc.insert("authors".into(), json!(meta.authors));
            }
            "isbn" => {
                doc.insert("isbn".into(), json!(meta.isbn));
            }
            "publication_year" => {
                doc.insert("publication_year".into(), json!(meta.publication_year));
            }
            "description" => {
                doc.insert("description".into(), json!(meta.description));
            }
            "subjects" => {
                doc.insert("subjects".into(), json!(meta.subjects));
            }
            other => {
                debug!("ignoring unknown metadata field {other:?}");
            }
        }
    }
    Value::Object(doc)
}

fn merge_metadata(current: &mut BookMetadata, meta: &BookMetadata, fields: &[&str]) {
    for field in fields {
        match *field {
            "title" => current.title = meta.title.clone(),
            "authors" => current.authors = meta.authors.clone(),
            "isbn" => current.isbn = meta.isbn.clone(),
            "publication_year" => current.publication_year = meta.publication_year,
            "description" => current.description = meta.description.clone(),
            "subjects" => current.subjects = meta.subjects.clone(),
            _ => {}
        }
    }
}

impl BookState {
    /// Sync write of an operation's four flag fields. Skips silently when
    /// the owning document does not exist yet, so callers can persist
    /// without caring which stage created its document.
    pub async fn persist_op_state(&self, op: OpKind) -> Result<Option<String>> {
        let store = require_store(self)?;
        let Some(doc_id) = self.op_doc_id(op) else {
            debug!(op = %op, "no owning document yet, skipping flag persist");
            return Ok(None);
        };
        let collection = op.spec().collection;
        let ack = store
            .update_with_version(collection, &doc_id, op_flag_doc(self, op))
            .await?;
        self.track_write(collection, &ack.doc_id, &ack.cid);
        Ok(Some(ack.cid))
    }

    /// Async flag write: memory has already advanced, CID tracking is
    /// skipped.
    pub fn persist_op_state_async(&self, op: OpKind) -> Result<()> {
        let store = require_store(self)?;
        let Some(doc_id) = self.op_doc_id(op) else {
            debug!(op = %op, "no owning document yet, skipping flag persist");
            return Ok(());
        };
        store.send(StoreOp::update(
            op.spec().collection,
            doc_id,
            op_flag_doc(self, op),
        ));
        Ok(())
    }

    /// Mark an operation complete: writes `{prefix}_complete = true` and
    /// `{prefix}_started = false`, then advances memory and records the
    /// operation's new cid.
    pub async fn persist_op_complete(&self, op: OpKind) -> Result<()> {
        let store = require_store(self)?;
        match self.op_doc_id(op) {
            Some(doc_id) => {
                let [f_started, f_complete, ..] = op.flag_fields();
                let collection = op.spec().collection;
                let ack = store
                    .update_with_version(
                        collection,
                        &doc_id,
                        json!({ f_complete: true, f_started: false }),
                    )
                    .await?;
                self.op_complete(op);
                self.track_write(collection, &ack.doc_id, &ack.cid);
            }
            None => {
                debug!(op = %op, "no owning document yet, completing in memory only");
                self.op_complete(op);
            }
        }
        Ok(())
    }

    /// Async completion: memory first, fire-and-forget write, no cid
    /// tracking.
    pub fn persist_op_complete_async(&self, op: OpKind) -> Result<()> {
        let store = require_store(self)?;
        self.op_complete(op);
        if let Some(doc_id) = self.op_doc_id(op) {
            let [f_started, f_complete, ..] = op.flag_fields();
            store.send(StoreOp::update(
                op.spec().collection,
                doc_id,
                json!({ f_complete: true, f_started: false }),
            ));
        }
        Ok(())
    }

    /// Sync book status write-through.
    pub async fn persist_book_status(&self, status: BookStatus) -> Result<()> {
        let store = require_store(self)?;
        let ack = store
            .update_with_version(
                collections::BOOK,
                self.id(),
                json!({ "status": status.as_str() }),
            )
            .await?;
        self.set_status(status);
        self.track_write(collections::BOOK, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async book status: memory first, then the sink.
    pub fn persist_book_status_async(&self, status: BookStatus) -> Result<()> {
        let store = require_store(self)?;
        self.set_status(status);
        store.send(StoreOp::update(
            collections::BOOK,
            self.id().to_string(),
            json!({ "status": status.as_str() }),
        ));
        Ok(())
    }

    /// Sync metadata result: writes only the named fields, then merges
    /// them into the cached metadata.
    pub async fn persist_metadata_result(
        &self,
        meta: &BookMetadata,
        fields: &[&str],
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(PersistError::Validation(
                "no metadata fields selected".to_string(),
            ));
        }
        let store = require_store(self)?;
        let ack = store
            .update_with_version(collections::BOOK, self.id(), metadata_doc(meta, fields))
            .await?;
        let mut current = self.metadata();
        merge_metadata(&mut current, meta, fields);
        self.set_metadata(current);
        self.track_write(collections::BOOK, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async metadata result: memory first, then the sink.
    pub fn persist_metadata_result_async(
        &self,
        meta: &BookMetadata,
        fields: &[&str],
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(PersistError::Validation(
                "no metadata fields selected".to_string(),
            ));
        }
        let store = require_store(self)?;
        let mut current = self.metadata();
        merge_metadata(&mut current, meta, fields);
        self.set_metadata(current);
        store.send(StoreOp::update(
            collections::BOOK,
            self.id().to_string(),
            metadata_doc(meta, fields),
        ));
        Ok(())
    }

    fn structure_phase_doc(&self, phase: &str) -> Value {
        let (extracted, classified, polished, polish_failures) = self.structure_counters();
        json!({
            "structure_phase": phase,
            "chapters_extracted": extracted,
            "chapters_classified": classified,
            "chapters_polished": polished,
            "polish_failures": polish_failures,
        })
    }

    /// Sync write of the structure phase plus its four progress counters.
    pub async fn persist_structure_phase(&self, phase: &str) -> Result<()> {
        let store = require_store(self)?;
        let ack = store
            .update_with_version(collections::BOOK, self.id(), self.structure_phase_doc(phase))
            .await?;
        self.set_structure_phase(phase);
        self.track_write(collections::BOOK, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async mirror of [`BookState::persist_structure_phase`].
    pub fn persist_structure_phase_async(&self, phase: &str) -> Result<()> {
        let store = require_store(self)?;
        self.set_structure_phase(phase);
        store.send(StoreOp::update(
            collections::BOOK,
            self.id().to_string(),
            self.structure_phase_doc(phase),
        ));
        Ok(())
    }

    /// Sync finalize-phase write. Unlike the stage-agnostic persisters
    /// this one logically requires the ToC document and errors without it.
    pub async fn persist_finalize_phase(&self, phase: &str) -> Result<()> {
        let store = require_store(self)?;
        let doc_id = self.toc_doc_id().ok_or(PersistError::NoTocDoc)?;
        let (chapters_found, gaps_investigated) = self.finalize_counters();
        let ack = store
            .update_with_version(
                collections::TOC,
                &doc_id,
                json!({
                    "finalize_phase": phase,
                    "chapters_found": chapters_found,
                    "gaps_investigated": gaps_investigated,
                }),
            )
            .await?;
        self.set_finalize_phase(phase);
        self.track_write(collections::TOC, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async finalize-phase write: memory first. Still requires the ToC
    /// document.
    pub fn persist_finalize_phase_async(&self, phase: &str) -> Result<()> {
        let store = require_store(self)?;
        let doc_id = self.toc_doc_id().ok_or(PersistError::NoTocDoc)?;
        self.set_finalize_phase(phase);
        let (chapters_found, gaps_investigated) = self.finalize_counters();
        store.send(StoreOp::update(
            collections::TOC,
            doc_id,
            json!({
                "finalize_phase": phase,
                "chapters_found": chapters_found,
                "gaps_investigated": gaps_investigated,
            }),
        ));
        Ok(())
    }

    /// Find or create the book's ToC document, caching its id.
    pub async fn ensure_toc_doc(&self) -> Result<String> {
        if let Some(doc_id) = self.toc_doc_id() {
            return Ok(doc_id);
        }
        let store = require_store(self)?;
        let ack = store
            .upsert_with_version(
                collections::TOC,
                vec![("book_id".to_string(), json!(self.id()))],
                json!({
                    "book_id": self.id(),
                    "toc_found": false,
                }),
                json!({}),
            )
            .await?;
        self.set_toc_doc_id(&ack.doc_id);
        self.track_write(collections::TOC, &ack.doc_id, &ack.cid);
        Ok(ack.doc_id)
    }

    /// Sync write of the ToC finder's discovery result.
    pub async fn persist_toc_result(
        &self,
        found: bool,
        start_page: Option<u32>,
        end_page: Option<u32>,
    ) -> Result<()> {
        let store = require_store(self)?;
        let doc_id = self.toc_doc_id().ok_or(PersistError::NoTocDoc)?;
        let ack = store
            .update_with_version(
                collections::TOC,
                &doc_id,
                json!({
                    "toc_found": found,
                    "start_page": start_page,
                    "end_page": end_page,
                }),
            )
            .await?;
        self.set_toc_result(found, start_page, end_page);
        self.track_write(collections::TOC, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async write-through of the per-stage cost tally onto the book
    /// document.
    pub fn persist_costs_async(&self) -> Result<()> {
        let store = require_store(self)?;
        let costs = self.costs_by_stage();
        store.send(StoreOp::update(
            collections::BOOK,
            self.id().to_string(),
            json!({ "stage_costs": costs }),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BookConfig;
    use crate::store::{MemoryStore, StateStore};
    use std::sync::Arc;

    async fn seeded_book() -> (BookState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ack = store
            .send_sync(StoreOp::create(
                collections::BOOK,
                json!({ "status": "pending" }),
            ))
            .await
            .unwrap();
        let config = BookConfig {
            total_pages: 3,
            ocr_providers: vec!["p1".into()],
            max_retries: 3,
            ..Default::default()
        };
        let book = BookState::with_store(ack.doc_id, config, store.clone());
        (book, store)
    }

    #[tokio::test]
    async fn op_state_skips_when_no_toc_doc() {
        let (book, store) = seeded_book().await;
        // toc ops have no owning document yet
        let cid = book.persist_op_state(OpKind::TocFinder).await.unwrap();
        assert!(cid.is_none());
        assert_eq!(store.count(collections::TOC), 0);
    }

    #[tokio::test]
    async fn op_complete_writes_complete_and_unsets_started() {
        let (book, store) = seeded_book().await;
        book.op_start(OpKind::Metadata).unwrap();
        book.persist_op_complete(OpKind::Metadata).await.unwrap();

        assert!(book.op_is_complete(OpKind::Metadata));
        assert!(!book.op_is_started(OpKind::Metadata));

        let doc = store.get_doc(collections::BOOK, book.id()).unwrap();
        assert_eq!(doc.get("metadata_complete"), Some(&json!(true)));
        assert_eq!(doc.get("metadata_started"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn finalize_phase_requires_toc_doc() {
        let (book, _store) = seeded_book().await;
        let err = book.persist_finalize_phase("pattern").await.unwrap_err();
        assert!(matches!(err, PersistError::NoTocDoc));

        book.ensure_toc_doc().await.unwrap();
        book.persist_finalize_phase("pattern").await.unwrap();
        assert_eq!(book.finalize_phase().as_deref(), Some("pattern"));
    }

    #[tokio::test]
    async fn ensure_toc_doc_is_idempotent() {
        let (book, store) = seeded_book().await;
        let first = book.ensure_toc_doc().await.unwrap();
        let second = book.ensure_toc_doc().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count(collections::TOC), 1);
    }

    #[tokio::test]
    async fn metadata_result_merges_named_fields_only() {
        let (book, store) = seeded_book().await;
        let meta = BookMetadata {
            title: Some("Moby-Dick".into()),
            authors: vec!["Herman Melville".into()],
            isbn: Some("ignored".into()),
            ..Default::default()
        };
        book.persist_metadata_result(&meta, &["title", "authors"])
            .await
            .unwrap();

        let cached = book.metadata();
        assert_eq!(cached.title.as_deref(), Some("Moby-Dick"));
        assert_eq!(cached.isbn, None);

        let doc = store.get_doc(collections::BOOK, book.id()).unwrap();
        assert_eq!(doc.get("title"), Some(&json!("Moby-Dick")));
        assert!(doc.get("isbn").is_none());
    }

    #[tokio::test]
    async fn store_failure_leaves_memory_unchanged() {
        let (book, store) = seeded_book().await;
        store.fail_nth_write(collections::BOOK, 1);
        let err = book.persist_book_status(BookStatus::Processing).await;
        assert!(err.is_err());
        assert_eq!(book.status(), BookStatus::Pending);
    }

    #[tokio::test]
    async fn missing_store_is_an_error() {
        let book = BookState::new("b1", BookConfig::default());
        let err = book.persist_book_status(BookStatus::Processing).await;
        assert!(matches!(err, Err(PersistError::StoreNotConfigured)));
    }
}
