//! Persisters for page rows, per-provider OCR results, reconciled
//! markdown, and the full OCR reset.

use serde_json::{json, Value};

use crate::state::{BookState, StateError};
use crate::store::{collections, DocQuery, StoreOp};
use crate::text::Heading;

use super::{aggregate_results, require_store, PersistError, Result};

impl BookState {
    /// Create a Page row for every page number missing one, registering
    /// the new rows in the page cache. Returns how many were created;
    /// a second call is a no-op returning 0.
    pub async fn create_missing_pages(&self) -> Result<usize> {
        let store = require_store(self)?;
        let missing: Vec<u32> = (1..=self.total_pages())
            .filter(|num| {
                self.page(*num)
                    .map(|page| page.doc_id().is_none())
                    .unwrap_or(true)
            })
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let ops = missing
            .iter()
            .map(|num| {
                StoreOp::create(
                    collections::PAGE,
                    json!({
                        "book_id": self.id(),
                        "page_num": num,
                        "extract_complete": false,
                        "ocr_complete": false,
                        "blend_complete": false,
                    }),
                )
            })
            .collect();
        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "page_create")?;

        for (num, result) in missing.iter().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            let page = self.get_or_create_page(*num);
            page.set_doc_id(&ack.doc_id);
            self.track_write(collections::PAGE, &ack.doc_id, &ack.cid);
        }
        Ok(missing.len())
    }

    /// Mark extraction done for a page, both on the row and in the cache.
    pub async fn persist_extract_complete(&self, page_num: u32) -> Result<()> {
        let store = require_store(self)?;
        let page = self
            .page(page_num)
            .ok_or(StateError::InvalidPage(page_num))?;
        let doc_id = page.doc_id().ok_or_else(|| {
            PersistError::Validation(format!("page {page_num} has no document yet"))
        })?;
        let ack = store
            .update_with_version(
                collections::PAGE,
                &doc_id,
                json!({ "extract_complete": true }),
            )
            .await?;
        page.set_extracted(true);
        self.track_write(collections::PAGE, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Record one provider's OCR result: creates the OcrResult row, then
    /// updates the Page with header/footer and the derived `ocr_complete`
    /// flag. Memory is updated only after both writes succeed. Returns
    /// true iff all configured providers are now done for the page.
    pub async fn persist_ocr_result(
        &self,
        page_num: u32,
        provider: &str,
        text: &str,
        header: &str,
        footer: &str,
    ) -> Result<bool> {
        if provider.is_empty() {
            return Err(PersistError::Validation(
                "provider name must not be empty".to_string(),
            ));
        }
        let store = require_store(self)?;
        let page = self
            .page(page_num)
            .ok_or(StateError::InvalidPage(page_num))?;
        let page_doc_id = page.doc_id().ok_or_else(|| {
            PersistError::Validation(format!("page {page_num} has no document yet"))
        })?;

        // Would every provider be done once this result lands?
        let all_done = self
            .ocr_providers()
            .iter()
            .all(|p| p == provider || page.ocr_complete(p));

        let result_ack = store
            .send_sync(StoreOp::create(
                collections::OCR_RESULT,
                json!({
                    "book_id": self.id(),
                    "page_id": page_doc_id,
                    "provider": provider,
                    "text": text,
                }),
            ))
            .await?;
        let page_ack = store
            .update_with_version(
                collections::PAGE,
                &page_doc_id,
                json!({
                    "header": header,
                    "footer": footer,
                    "ocr_complete": all_done,
                }),
            )
            .await?;

        page.mark_ocr_complete(provider, text);
        if !header.is_empty() {
            page.set_header(Some(header.to_string()));
        }
        if !footer.is_empty() {
            page.set_footer(Some(footer.to_string()));
        }
        self.track_write(collections::OCR_RESULT, &result_ack.doc_id, &result_ack.cid);
        self.track_write(collections::PAGE, &page_ack.doc_id, &page_ack.cid);
        Ok(all_done)
    }

    /// Write the reconciled markdown and its headings for a page, caching
    /// both on success.
    pub async fn persist_ocr_markdown(
        &self,
        page_num: u32,
        markdown: &str,
        headings: Vec<Heading>,
    ) -> Result<()> {
        let store = require_store(self)?;
        let page = self
            .page(page_num)
            .ok_or(StateError::InvalidPage(page_num))?;
        let doc_id = page.doc_id().ok_or_else(|| {
            PersistError::Validation(format!("page {page_num} has no document yet"))
        })?;
        let headings_json = serde_json::to_string(&headings).map_err(crate::store::StoreError::from)?;
        let ack = store
            .update_with_version(
                collections::PAGE,
                &doc_id,
                json!({
                    "ocr_markdown": markdown,
                    "headings": headings_json,
                    "blend_complete": true,
                }),
            )
            .await?;
        page.set_blend_result(markdown, headings);
        self.track_write(collections::PAGE, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Rewind OCR for the whole book: clear every completed page row,
    /// delete the OcrResult rows, and only then clear the page cache.
    /// Returns how many pages were reset.
    pub async fn reset_all_ocr(&self) -> Result<usize> {
        let store = require_store(self)?;
        let pages = store
            .execute(
                DocQuery::collection(collections::PAGE)
                    .filter("book_id", self.id())
                    .filter("ocr_complete", true),
            )
            .await?;
        if !pages.is_empty() {
            let ops = pages
                .iter()
                .map(|doc| {
                    StoreOp::update(
                        collections::PAGE,
                        doc.doc_id.clone(),
                        json!({
                            "ocr_complete": false,
                            "blend_complete": false,
                            "ocr_markdown": Value::Null,
                            "headings": Value::Null,
                            "header": Value::Null,
                            "footer": Value::Null,
                        }),
                    )
                })
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "page_ocr_reset")?;
        }

        let ocr_rows = store
            .execute(DocQuery::collection(collections::OCR_RESULT).filter("book_id", self.id()))
            .await?;
        if !ocr_rows.is_empty() {
            let ops = ocr_rows
                .iter()
                .map(|doc| StoreOp::delete(collections::OCR_RESULT, doc.doc_id.clone()))
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "ocr_result_delete")?;
        }

        self.for_each_page(|page| page.clear_ocr());
        Ok(pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BookConfig;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn book_with_pages(total: u32, providers: &[&str]) -> (BookState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = BookConfig {
            total_pages: total,
            ocr_providers: providers.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let book = BookState::with_store("book1", config, store.clone());
        (book, store)
    }

    #[tokio::test]
    async fn create_missing_pages_then_noop() {
        let (book, store) = book_with_pages(5, &["p1"]);
        assert_eq!(book.create_missing_pages().await.unwrap(), 5);
        assert_eq!(store.count(collections::PAGE), 5);
        assert_eq!(book.count_pages(), 5);
        for num in 1..=5 {
            let page = book.page(num).unwrap();
            assert!(page.doc_id().is_some());
            assert!(page.cid().is_some());
        }
        assert_eq!(book.create_missing_pages().await.unwrap(), 0);
        assert_eq!(store.count(collections::PAGE), 5);
    }

    #[tokio::test]
    async fn ocr_result_derives_completion_transition() {
        let (book, store) = book_with_pages(3, &["P1", "P2"]);
        book.create_missing_pages().await.unwrap();

        let first = book
            .persist_ocr_result(1, "P1", "a", "h", "f")
            .await
            .unwrap();
        assert!(!first);
        let second = book
            .persist_ocr_result(1, "P2", "b", "h", "f")
            .await
            .unwrap();
        assert!(second);

        let page = book.page(1).unwrap();
        assert!(page.all_ocr_done(&["P1".to_string(), "P2".to_string()]));
        let doc = store
            .get_doc(collections::PAGE, &page.doc_id().unwrap())
            .unwrap();
        assert_eq!(doc.get("ocr_complete"), Some(&json!(true)));
        assert_eq!(store.count(collections::OCR_RESULT), 2);
    }

    #[tokio::test]
    async fn empty_text_counts_as_done() {
        let (book, _store) = book_with_pages(1, &["P1"]);
        book.create_missing_pages().await.unwrap();
        let all = book.persist_ocr_result(1, "P1", "", "", "").await.unwrap();
        assert!(all);
        assert_eq!(book.page(1).unwrap().ocr_text("P1").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn failed_page_update_leaves_memory_unchanged() {
        let (book, store) = book_with_pages(1, &["P1"]);
        book.create_missing_pages().await.unwrap();
        // the next Page write (the ocr_complete update) fails
        store.fail_nth_write(collections::PAGE, 1);
        let err = book.persist_ocr_result(1, "P1", "text", "", "").await;
        assert!(err.is_err());
        assert!(!book.page(1).unwrap().ocr_complete("P1"));
    }

    #[tokio::test]
    async fn markdown_write_through_caches_headings() {
        let (book, store) = book_with_pages(1, &["P1"]);
        book.create_missing_pages().await.unwrap();
        book.persist_ocr_markdown(
            1,
            "# Chapter One\n\ntext",
            vec![Heading {
                level: 1,
                text: "Chapter One".into(),
            }],
        )
        .await
        .unwrap();

        let page = book.page(1).unwrap();
        assert!(page.blend_complete());
        assert_eq!(page.headings().unwrap()[0].text, "Chapter One");
        let doc = store
            .get_doc(collections::PAGE, &page.doc_id().unwrap())
            .unwrap();
        assert_eq!(doc.get("blend_complete"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn reset_all_ocr_round_trip() {
        let (book, store) = book_with_pages(2, &["P1"]);
        book.create_missing_pages().await.unwrap();
        for num in 1..=2 {
            book.persist_ocr_result(num, "P1", "text", "h", "f")
                .await
                .unwrap();
            book.persist_ocr_markdown(num, "md", vec![]).await.unwrap();
        }

        let reset = book.reset_all_ocr().await.unwrap();
        assert_eq!(reset, 2);
        assert_eq!(store.count(collections::OCR_RESULT), 0);
        for num in 1..=2 {
            let page = book.page(num).unwrap();
            assert!(!page.ocr_complete("P1"));
            assert_eq!(page.ocr_markdown(), None);
        }
        let doc = store
            .get_doc(collections::PAGE, &book.page(1).unwrap().doc_id().unwrap())
            .unwrap();
        assert_eq!(doc.get("ocr_complete"), Some(&json!(false)));
        assert!(doc.get("ocr_markdown").is_none());
    }
}
