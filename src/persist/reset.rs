//! Stage reset with downstream cascade.

use serde_json::{json, Value};
use tracing::info;

use crate::models::BookMetadata;
use crate::state::{BookState, OpKind};
use crate::store::collections;

use super::{require_store, Result};

impl BookState {
    /// Rewind an operation and everything downstream of it, per the
    /// registry's cascade order. For each operation in the set this
    /// deletes its derived documents, deletes the agent checkpoints it
    /// owns, zeroes the matching in-memory sub-state, and resets and
    /// re-persists its flags.
    ///
    /// All steps are synchronous; the first failure aborts the cascade
    /// and surfaces. Each sub-step is itself all-or-nothing in memory, so
    /// a partial cascade is recoverable by re-running the reset.
    pub async fn reset_from(&self, start: OpKind) -> Result<()> {
        let store = require_store(self)?;
        for op in start.reset_set() {
            info!(op = %op, "resetting operation");
            match op {
                OpKind::Metadata => {
                    self.set_metadata(BookMetadata::default());
                }
                OpKind::TocFinder => {
                    self.clear_toc_result();
                    if let Some(toc_id) = self.toc_doc_id() {
                        let ack = store
                            .update_with_version(
                                collections::TOC,
                                &toc_id,
                                json!({
                                    "toc_found": false,
                                    "start_page": Value::Null,
                                    "end_page": Value::Null,
                                    "structure_summary": Value::Null,
                                }),
                            )
                            .await?;
                        self.track_write(collections::TOC, &ack.doc_id, &ack.cid);
                    }
                }
                OpKind::TocExtract => {
                    if let Some(toc_id) = self.toc_doc_id() {
                        self.delete_all_toc_entries(&toc_id).await?;
                    } else {
                        self.clear_toc_entries();
                        self.clear_linked_entries();
                    }
                }
                OpKind::TocLink => {
                    if let Some(toc_id) = self.toc_doc_id() {
                        self.clear_all_toc_entry_links(&toc_id).await?;
                    } else {
                        self.clear_entry_links_in_memory();
                    }
                    self.set_link_counters(0, 0);
                }
                OpKind::TocFinalize => {
                    self.clear_finalize_state();
                    if let Some(toc_id) = self.toc_doc_id() {
                        let ack = store
                            .update_with_version(
                                collections::TOC,
                                &toc_id,
                                json!({
                                    "finalize_phase": Value::Null,
                                    "chapters_found": 0,
                                    "gaps_investigated": 0,
                                }),
                            )
                            .await?;
                        self.track_write(collections::TOC, &ack.doc_id, &ack.cid);
                    }
                }
                OpKind::Structure => {
                    self.delete_all_chapters().await?;
                    self.set_structure_counters(0, 0, 0, 0);
                    let ack = store
                        .update_with_version(
                            collections::BOOK,
                            self.id(),
                            json!({
                                "structure_phase": Value::Null,
                                "chapters_extracted": 0,
                                "chapters_classified": 0,
                                "chapters_polished": 0,
                                "polish_failures": 0,
                            }),
                        )
                        .await?;
                    self.track_write(collections::BOOK, &ack.doc_id, &ack.cid);
                }
            }

            for kind in op.spec().agent_kinds {
                self.delete_agent_states_for_kind(*kind).await?;
            }

            self.op_reset(op);
            self.persist_op_state(op).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TocEntry;
    use crate::state::BookConfig;
    use crate::store::{MemoryStore, StateStore, StoreOp};
    use std::sync::Arc;

    async fn seeded() -> (BookState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let book_ack = store
            .send_sync(StoreOp::create(
                collections::BOOK,
                json!({ "status": "processing" }),
            ))
            .await
            .unwrap();
        let book = BookState::with_store(book_ack.doc_id, BookConfig::default(), store.clone());
        book.ensure_toc_doc().await.unwrap();
        (book, store)
    }

    #[tokio::test]
    async fn reset_from_extract_spares_finder() {
        let (book, store) = seeded().await;
        let toc_id = book.toc_doc_id().unwrap();

        // seed three entries and completed ops through toc_link
        let entries = vec![
            TocEntry::new(&toc_id, 0, "One"),
            TocEntry::new(&toc_id, 1, "Two"),
            TocEntry::new(&toc_id, 2, "Three"),
        ];
        book.persist_toc_entries(&toc_id, entries).await.unwrap();
        for op in [OpKind::TocFinder, OpKind::TocExtract, OpKind::TocLink] {
            book.op_start(op).unwrap();
            book.persist_op_complete(op).await.unwrap();
        }

        book.reset_from(OpKind::TocExtract).await.unwrap();

        assert_eq!(store.count(collections::TOC_ENTRY), 0);
        assert!(book.toc_entries().is_none());
        assert!(book.op_is_complete(OpKind::TocFinder));
        for op in [
            OpKind::TocExtract,
            OpKind::TocLink,
            OpKind::TocFinalize,
            OpKind::Structure,
        ] {
            assert!(book.op_can_start(op), "{op} should be re-runnable");
            assert!(!book.op_is_complete(op));
        }

        let toc_doc = store.get_doc(collections::TOC, &toc_id).unwrap();
        assert_eq!(toc_doc.get("extract_complete"), Some(&json!(false)));
        assert_eq!(toc_doc.get("finder_complete"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn reset_structure_deletes_chapters_only() {
        let (book, store) = seeded().await;
        let mut chapter = crate::models::Chapter::new("One", 1, 5);
        chapter.entry_id = Some("e1".into());
        book.persist_chapter_skeleton(vec![chapter]).await.unwrap();
        book.op_start(OpKind::Structure).unwrap();
        book.persist_op_complete(OpKind::Structure).await.unwrap();

        book.reset_from(OpKind::Structure).await.unwrap();

        assert_eq!(store.count(collections::CHAPTER), 0);
        assert!(book.structure_chapters().is_empty());
        assert!(book.op_can_start(OpKind::Structure));
        let book_doc = store.get_doc(collections::BOOK, book.id()).unwrap();
        assert_eq!(book_doc.get("structure_complete"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn reset_finder_clears_discovery_and_agents() {
        let (book, store) = seeded().await;
        book.set_toc_result(true, Some(3), Some(5));
        let mut agent =
            crate::models::AgentState::new(crate::models::AgentKind::TocFinder, "run-1");
        book.persist_new_agent_state(&mut agent).await.unwrap();

        book.reset_from(OpKind::TocFinder).await.unwrap();

        assert!(!book.toc_found());
        assert_eq!(book.toc_page_range(), None);
        assert_eq!(store.count(collections::AGENT_STATE), 0);
        assert!(book
            .agent_state(crate::models::AgentKind::TocFinder, None)
            .is_none());
    }
}
