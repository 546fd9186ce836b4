//! Store-to-memory hydration: full book load at job start, batched page
//! preloads, and single-object lazy loads.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{
    AgentKind, AgentRunSummary, AgentState, BookMetadata, BookStatus, Chapter, ContentType,
    EntrySource, MatterType, TocEntry,
};
use crate::state::{BookConfig, BookState, OpKind, OperationState};
use crate::store::{collections, DocQuery, DocResult, StateStore};
use crate::text::Heading;

use super::Result;

/// Which entries a ToC entry load returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFilter {
    All,
    Unlinked,
}

fn parse_op_state(doc: &DocResult, op: OpKind) -> OperationState {
    let [f_started, f_complete, f_failed, f_retries] = op.flag_fields();
    OperationState::from_flags(
        doc.bool_field(&f_started),
        doc.bool_field(&f_complete),
        doc.bool_field(&f_failed),
        doc.u32_field(&f_retries).unwrap_or(0),
    )
}

fn parse_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_metadata(doc: &DocResult) -> BookMetadata {
    BookMetadata {
        title: doc.str_field("title").map(String::from),
        authors: parse_string_list(doc.fields.get("authors")),
        isbn: doc.str_field("isbn").map(String::from),
        publication_year: doc.i64_field("publication_year").map(|y| y as i32),
        description: doc.str_field("description").map(String::from),
        subjects: parse_string_list(doc.fields.get("subjects")),
    }
}

fn parse_toc_entry(doc: &DocResult) -> Option<TocEntry> {
    Some(TocEntry {
        doc_id: Some(doc.doc_id.clone()),
        toc_id: doc.str_field("toc_id")?.to_string(),
        sort_order: doc.i64_field("sort_order").unwrap_or(0),
        title: doc.str_field("title").unwrap_or_default().to_string(),
        level: doc.u32_field("level").unwrap_or(2),
        level_name: doc.str_field("level_name").map(String::from),
        entry_number: doc.str_field("entry_number").map(String::from),
        printed_page: doc.str_field("printed_page_number").map(String::from),
        actual_page_id: doc.str_field("actual_page_id").map(String::from),
        actual_page_num: doc.u32_field("actual_page_num"),
        source: doc
            .str_field("source")
            .and_then(EntrySource::parse)
            .unwrap_or(EntrySource::Extracted),
    })
}

fn parse_chapter(doc: &DocResult) -> Chapter {
    Chapter {
        doc_id: Some(doc.doc_id.clone()),
        cid: Some(doc.cid.clone()),
        entry_id: doc.str_field("entry_id").map(String::from),
        title: doc.str_field("title").unwrap_or_default().to_string(),
        level: doc.u32_field("level").unwrap_or(2),
        start_page: doc.u32_field("start_page").unwrap_or(0),
        end_page: doc.u32_field("end_page").unwrap_or(0),
        matter: doc.str_field("matter_type").and_then(MatterType::parse),
        content_type: doc.str_field("content_type").and_then(ContentType::parse),
        audio_include: doc.fields.get("audio_include").and_then(Value::as_bool),
        mechanical_text: doc.str_field("mechanical_text").map(String::from),
        polished_text: doc.str_field("polished_text").map(String::from),
        word_count: doc.u32_field("word_count").unwrap_or(0),
        extract_done: doc.bool_field("extract_done"),
        polish_done: doc.bool_field("polish_done"),
        polish_failed: doc.bool_field("polish_failed"),
        sort_order: doc.i64_field("sort_order").unwrap_or(0),
    }
}

fn parse_agent_state(doc: &DocResult) -> Option<AgentState> {
    let kind_raw = doc.str_field("agent_type")?;
    let Some(kind) = AgentKind::parse(kind_raw) else {
        warn!("skipping checkpoint with unknown agent kind {kind_raw:?}");
        return None;
    };
    Some(AgentState {
        doc_id: Some(doc.doc_id.clone()),
        cid: Some(doc.cid.clone()),
        kind,
        agent_id: doc.str_field("agent_id").unwrap_or_default().to_string(),
        entry_doc_id: doc.str_field("entry_doc_id").map(String::from),
        iteration: doc.u32_field("iteration").unwrap_or(0),
        complete: doc.bool_field("complete"),
        messages_json: doc.str_field("messages_json").unwrap_or_default().to_string(),
        pending_tool_calls: doc.str_field("pending_tool_calls").map(String::from),
        tool_results: doc.str_field("tool_results").map(String::from),
        result_json: doc.str_field("result_json").map(String::from),
    })
}

/// Load the entries under a ToC document, ordered by sort order. The
/// filter is explicit: callers wanting the full entry set ask for it.
pub async fn load_toc_entries(
    store: &Arc<dyn StateStore>,
    toc_doc_id: &str,
    filter: EntryFilter,
) -> Result<Vec<TocEntry>> {
    let docs = store
        .execute(
            DocQuery::collection(collections::TOC_ENTRY)
                .filter("toc_id", toc_doc_id)
                .order_asc("sort_order"),
        )
        .await?;
    let entries = docs
        .iter()
        .filter_map(parse_toc_entry)
        .filter(|entry| match filter {
            EntryFilter::All => true,
            EntryFilter::Unlinked => !entry.is_linked(),
        })
        .collect();
    Ok(entries)
}

/// Hydrate a [`BookState`] from persisted state: the book document, the
/// ToC document and its entries, chapters, agent checkpoints, page rows,
/// and per-provider OCR results.
pub async fn load_book(
    store: Arc<dyn StateStore>,
    book_id: &str,
    config: BookConfig,
) -> Result<BookState> {
    let book = BookState::with_store(book_id, config, store.clone());

    // Book document: status, metadata, book-owned op flags, counters.
    let docs = store
        .execute(DocQuery::collection(collections::BOOK).filter("_id", book_id))
        .await?;
    if let Some(doc) = docs.first() {
        if let Some(status) = doc.str_field("status").and_then(BookStatus::parse) {
            book.set_status(status);
        }
        book.set_metadata(parse_metadata(doc));
        book.set_op_state(OpKind::Metadata, parse_op_state(doc, OpKind::Metadata));
        book.set_op_state(OpKind::Structure, parse_op_state(doc, OpKind::Structure));
        if let Some(phase) = doc.str_field("structure_phase") {
            book.set_structure_phase(phase);
        }
        book.set_structure_counters(
            doc.u32_field("chapters_extracted").unwrap_or(0),
            doc.u32_field("chapters_classified").unwrap_or(0),
            doc.u32_field("chapters_polished").unwrap_or(0),
            doc.u32_field("polish_failures").unwrap_or(0),
        );
        book.set_link_counters(
            doc.u32_field("entries_linked").unwrap_or(0),
            doc.u32_field("entries_skipped").unwrap_or(0),
        );
        book.track_write(collections::BOOK, &doc.doc_id, &doc.cid);
    }

    // ToC document: discovery result and toc-owned op flags.
    let docs = store
        .execute(DocQuery::collection(collections::TOC).filter("book_id", book_id))
        .await?;
    if let Some(doc) = docs.first() {
        book.set_toc_doc_id(&doc.doc_id);
        for op in [
            OpKind::TocFinder,
            OpKind::TocExtract,
            OpKind::TocLink,
            OpKind::TocFinalize,
        ] {
            book.set_op_state(op, parse_op_state(doc, op));
        }
        book.set_toc_result(
            doc.bool_field("toc_found"),
            doc.u32_field("start_page"),
            doc.u32_field("end_page"),
        );
        book.set_structure_summary(doc.str_field("structure_summary").map(String::from));
        if let Some(phase) = doc.str_field("finalize_phase") {
            book.set_finalize_phase(phase);
        }
        book.set_finalize_counters(
            doc.u32_field("chapters_found").unwrap_or(0),
            doc.u32_field("gaps_investigated").unwrap_or(0),
        );
        book.track_write(collections::TOC, &doc.doc_id, &doc.cid);

        let all = load_toc_entries(&store, &doc.doc_id, EntryFilter::All).await?;
        if !all.is_empty() {
            let unlinked: Vec<TocEntry> = all.iter().filter(|e| !e.is_linked()).cloned().collect();
            book.set_linked_entries(all);
            book.set_toc_entries(unlinked);
        }
    }

    // Chapters.
    let docs = store
        .execute(
            DocQuery::collection(collections::CHAPTER)
                .filter("book_id", book_id)
                .order_asc("sort_order"),
        )
        .await?;
    if !docs.is_empty() {
        let chapters: Vec<Chapter> = docs.iter().map(parse_chapter).collect();
        for doc in &docs {
            book.track_write(collections::CHAPTER, &doc.doc_id, &doc.cid);
        }
        book.set_structure_chapters(chapters);
    }

    // Agent checkpoints.
    let docs = store
        .execute(DocQuery::collection(collections::AGENT_STATE).filter("book_id", book_id))
        .await?;
    for doc in &docs {
        if let Some(state) = parse_agent_state(doc) {
            book.set_agent_state(state);
            book.track_write(collections::AGENT_STATE, &doc.doc_id, &doc.cid);
        }
    }

    // Page rows and per-provider OCR results.
    let docs = store
        .execute(DocQuery::collection(collections::PAGE).filter("book_id", book_id))
        .await?;
    let mut page_by_doc: HashMap<String, u32> = HashMap::new();
    for doc in &docs {
        let Some(page_num) = doc.u32_field("page_num") else {
            warn!("skipping page row {} without page_num", doc.doc_id);
            continue;
        };
        let page = book.get_or_create_page(page_num);
        page.set_doc_id(&doc.doc_id);
        page.populate_from_db(&doc.fields);
        page_by_doc.insert(doc.doc_id.clone(), page_num);
        book.track_write(collections::PAGE, &doc.doc_id, &doc.cid);
    }

    let docs = store
        .execute(DocQuery::collection(collections::OCR_RESULT).filter("book_id", book_id))
        .await?;
    for doc in &docs {
        let Some(page_num) = doc
            .str_field("page_id")
            .and_then(|id| page_by_doc.get(id).copied())
        else {
            debug!("skipping OCR result {} for unknown page", doc.doc_id);
            continue;
        };
        let (Some(provider), Some(text)) = (doc.str_field("provider"), doc.str_field("text"))
        else {
            continue;
        };
        if let Some(page) = book.page(page_num) {
            page.mark_ocr_complete(provider, text);
        }
    }

    Ok(book)
}

impl BookState {
    /// Lazy single-page load: fetch and ingest the page document unless
    /// the cache already holds it.
    pub async fn ensure_page_data(&self, page_num: u32) -> Result<()> {
        let page = self.get_or_create_page(page_num);
        if page.is_data_loaded() {
            return Ok(());
        }
        let store = super::require_store(self)?;
        let docs = store
            .execute(
                DocQuery::collection(collections::PAGE)
                    .filter("book_id", self.id())
                    .filter("page_num", page_num),
            )
            .await?;
        if let Some(doc) = docs.first() {
            page.set_doc_id(&doc.doc_id);
            page.populate_from_db(&doc.fields);
            self.track_write(collections::PAGE, &doc.doc_id, &doc.cid);
        }
        Ok(())
    }

    /// Batched range preload. Clamps the range, skips entirely when every
    /// page in it is already cached, and ingests only results that are
    /// in range and not yet loaded.
    pub async fn preload_pages(&self, start: u32, end: u32) -> Result<()> {
        let start = start.max(1);
        let end = end.min(self.total_pages());
        if start > end {
            return Ok(());
        }
        let needs_load = (start..=end).any(|num| {
            self.page(num)
                .map(|page| !page.is_data_loaded())
                .unwrap_or(true)
        });
        if !needs_load {
            return Ok(());
        }

        let store = super::require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::PAGE).filter("book_id", self.id()))
            .await?;
        for doc in &docs {
            let Some(page_num) = doc.u32_field("page_num") else {
                warn!("skipping page row {} without page_num", doc.doc_id);
                continue;
            };
            if page_num < start || page_num > end {
                continue;
            }
            let page = self.get_or_create_page(page_num);
            if page.is_data_loaded() {
                continue;
            }
            page.set_doc_id(&doc.doc_id);
            page.populate_from_db(&doc.fields);
            self.track_write(collections::PAGE, &doc.doc_id, &doc.cid);
        }
        Ok(())
    }

    /// First chapter-level heading (level <= 2) per page in the range,
    /// optionally skipping pages flagged as ToC pages.
    pub async fn pages_with_headings(
        &self,
        start: u32,
        end: u32,
        exclude_toc_pages: bool,
    ) -> Result<Vec<(u32, Heading)>> {
        self.preload_pages(start, end).await?;
        let mut found = Vec::new();
        self.for_each_page(|page| {
            let num = page.page_num();
            if num < start || num > end {
                return;
            }
            if exclude_toc_pages && page.is_toc_page() {
                return;
            }
            if let Some(heading) = page
                .headings()
                .unwrap_or_default()
                .into_iter()
                .find(|h| h.level <= 2)
            {
                found.push((num, heading));
            }
        });
        Ok(found)
    }

    /// Lazy cost load from the book document's `stage_costs` field.
    pub async fn ensure_costs_loaded(&self) -> Result<()> {
        if self.costs_loaded() {
            return Ok(());
        }
        let store = super::require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::BOOK).filter("_id", self.id()))
            .await?;
        let costs = docs
            .first()
            .and_then(|doc| doc.fields.get("stage_costs"))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(stage, value)| value.as_f64().map(|v| (stage.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();
        self.set_costs(costs);
        Ok(())
    }

    /// Lazy load of the append-only agent run summaries.
    pub async fn ensure_agent_runs_loaded(&self) -> Result<()> {
        if self.agent_runs_loaded() {
            return Ok(());
        }
        let store = super::require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::AGENT_RUN).filter("book_id", self.id()))
            .await?;
        let runs = docs
            .iter()
            .filter_map(|doc| {
                Some(AgentRunSummary {
                    kind: AgentKind::parse(doc.str_field("agent_type")?)?,
                    item_key: doc.str_field("item_key").unwrap_or_default().to_string(),
                    iterations: doc.u32_field("iterations").unwrap_or(0),
                    cost: doc.f64_field("cost").unwrap_or(0.0),
                    outcome: doc.str_field("outcome").unwrap_or_default().to_string(),
                })
            })
            .collect();
        self.set_agent_runs(runs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config(total_pages: u32) -> BookConfig {
        BookConfig {
            total_pages,
            ocr_providers: vec!["P1".into(), "P2".into()],
            ..Default::default()
        }
    }

    async fn round_trip_book() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let ack = store
            .send_sync(crate::store::StoreOp::create(
                collections::BOOK,
                serde_json::json!({ "status": "processing" }),
            ))
            .await
            .unwrap();
        (store, ack.doc_id)
    }

    #[tokio::test]
    async fn load_restores_ops_pages_and_ocr() {
        let (store, book_id) = round_trip_book().await;
        let dyn_store: Arc<dyn StateStore> = store.clone();

        // build up state through the persisters, then reload fresh
        let book = load_book(dyn_store.clone(), &book_id, config(3))
            .await
            .unwrap();
        book.create_missing_pages().await.unwrap();
        book.persist_ocr_result(1, "P1", "alpha", "", "").await.unwrap();
        book.persist_ocr_result(1, "P2", "beta", "", "").await.unwrap();
        book.persist_ocr_markdown(1, "# Opening", vec![Heading { level: 1, text: "Opening".into() }])
            .await
            .unwrap();
        book.ensure_toc_doc().await.unwrap();
        book.op_start(OpKind::TocFinder).unwrap();
        book.persist_op_complete(OpKind::TocFinder).await.unwrap();
        book.persist_toc_result(true, Some(2), Some(3)).await.unwrap();
        drop(book);

        let reloaded = load_book(dyn_store, &book_id, config(3)).await.unwrap();
        assert_eq!(reloaded.status(), BookStatus::Processing);
        assert_eq!(reloaded.count_pages(), 3);
        assert!(reloaded.op_is_complete(OpKind::TocFinder));
        assert_eq!(reloaded.toc_page_range(), Some((2, 3)));

        let page = reloaded.page(1).unwrap();
        assert!(page.ocr_complete("P1"));
        assert!(page.ocr_complete("P2"));
        assert_eq!(page.ocr_text("P1").as_deref(), Some("alpha"));
        assert_eq!(page.ocr_markdown().as_deref(), Some("# Opening"));
        assert_eq!(page.headings().unwrap()[0].text, "Opening");
    }

    #[tokio::test]
    async fn entry_filter_is_explicit() {
        let (store, book_id) = round_trip_book().await;
        let dyn_store: Arc<dyn StateStore> = store.clone();
        let book = load_book(dyn_store.clone(), &book_id, config(3))
            .await
            .unwrap();
        let toc_id = book.ensure_toc_doc().await.unwrap();
        let mut linked = crate::models::TocEntry::new(&toc_id, 0, "Linked");
        linked.actual_page_id = Some("page-x".into());
        linked.actual_page_num = Some(4);
        let unlinked = crate::models::TocEntry::new(&toc_id, 1, "Unlinked");
        book.persist_toc_entries(&toc_id, vec![linked, unlinked])
            .await
            .unwrap();

        let all = load_toc_entries(&dyn_store, &toc_id, EntryFilter::All)
            .await
            .unwrap();
        let unlinked_only = load_toc_entries(&dyn_store, &toc_id, EntryFilter::Unlinked)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(unlinked_only.len(), 1);
        assert_eq!(unlinked_only[0].title, "Unlinked");
    }

    #[tokio::test]
    async fn preload_skips_loaded_and_clamps() {
        let (store, book_id) = round_trip_book().await;
        let dyn_store: Arc<dyn StateStore> = store.clone();
        let book = load_book(dyn_store, &book_id, config(3)).await.unwrap();
        book.create_missing_pages().await.unwrap();
        book.persist_ocr_markdown(2, "# Two", vec![Heading { level: 1, text: "Two".into() }])
            .await
            .unwrap();

        // fresh book, nothing cached
        let fresh_store: Arc<dyn StateStore> = store.clone();
        let fresh = load_book(fresh_store, &book_id, config(3)).await.unwrap();
        fresh.preload_pages(0, 99).await.unwrap();
        assert_eq!(fresh.count_pages(), 3);

        let headings = fresh.pages_with_headings(1, 3, false).await.unwrap();
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].0, 2);
        assert_eq!(headings[0].1.text, "Two");
    }

    #[tokio::test]
    async fn costs_lazy_load_defaults_empty() {
        let (store, book_id) = round_trip_book().await;
        let dyn_store: Arc<dyn StateStore> = store;
        let book = load_book(dyn_store, &book_id, config(3)).await.unwrap();
        assert!(!book.costs_loaded());
        book.ensure_costs_loaded().await.unwrap();
        assert!(book.costs_loaded());
        assert_eq!(book.total_cost(), 0.0);
    }
}
