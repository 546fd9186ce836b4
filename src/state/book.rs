//! The per-book aggregate: sole owner of all mutable pipeline state.
//!
//! A single RW mutex guards every mutable field. Sub-objects reached from
//! multiple workers through the page map ([`PageState`]) carry their own
//! locks; the book lock is always acquired first, never inside a page
//! lock. Accessors that return collection-valued data return copies, so
//! callers may mutate the result freely. The one exception is
//! [`BookState::for_each_page`], which runs a callback under the shared
//! lock — the callback must not call back into the same book.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::models::{
    AgentRunSummary, AgentState, BookMetadata, BookStatus, Chapter, EntryToFind, GapRange,
    PatternResult, TocEntry,
};
use crate::store::{collections, StateStore};

use super::{OpKind, OperationState, PageState, StateError};

/// One input PDF and how many pages it contributes to the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePdf {
    pub path: PathBuf,
    pub page_count: u32,
}

/// A resolved prompt text plus the content id it was loaded under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub text: String,
    pub cid: Option<String>,
}

/// Which optional stages this run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageToggles {
    pub metadata: bool,
    pub toc: bool,
    pub structure: bool,
    pub polish: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            metadata: true,
            toc: true,
            structure: true,
            polish: true,
        }
    }
}

/// Immutable per-book pipeline configuration, fixed at load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookConfig {
    pub total_pages: u32,
    pub source_pdfs: Vec<SourcePdf>,
    /// OCR providers that must each produce a result per page.
    pub ocr_providers: Vec<String>,
    /// Model/provider selection per LLM phase.
    pub phase_models: HashMap<String, String>,
    /// Resolved prompt texts keyed by prompt name.
    pub prompts: HashMap<String, PromptInfo>,
    pub stages: StageToggles,
    pub max_retries: u32,
    pub data_dir: PathBuf,
}

impl BookConfig {
    pub fn prompt(&self, key: &str) -> Option<&PromptInfo> {
        self.prompts.get(key)
    }
}

/// ToC discovery results and finalize phase, persisted on the Toc doc.
#[derive(Debug, Clone, Default)]
struct TocState {
    doc_id: Option<String>,
    cid: Option<String>,
    found: bool,
    start_page: Option<u32>,
    end_page: Option<u32>,
    structure_summary: Option<String>,
    finalize_phase: Option<String>,
}

/// Progress counters for the link stage.
#[derive(Debug, Clone, Copy, Default)]
struct LinkCounters {
    entries_linked: u32,
    entries_skipped: u32,
}

/// Finalize sub-state: pattern analysis and discovery bookkeeping.
#[derive(Debug, Clone, Default)]
struct FinalizeState {
    pattern: Option<PatternResult>,
    entries_to_find: Vec<EntryToFind>,
    gaps: Vec<GapRange>,
    chapters_found: u32,
    gaps_investigated: u32,
}

/// Structure sub-state: chapter list, phase, progress counters.
#[derive(Debug, Clone, Default)]
struct StructureState {
    phase: Option<String>,
    chapters: Vec<Chapter>,
    classify_reasonings: Vec<String>,
    chapters_extracted: u32,
    chapters_classified: u32,
    chapters_polished: u32,
    polish_failures: u32,
}

#[derive(Default)]
struct BookInner {
    status: BookStatus,
    book_cid: Option<String>,
    metadata: BookMetadata,
    pages: HashMap<u32, Arc<PageState>>,
    ops: HashMap<OpKind, OperationState>,
    toc: TocState,
    /// Entries from ToC extraction; pre-filtered to unlinked at load.
    toc_entries: Option<Vec<TocEntry>>,
    /// Full entry set carried through the link and finalize stages.
    linked_entries: Vec<TocEntry>,
    link: LinkCounters,
    finalize: FinalizeState,
    structure: StructureState,
    agents: HashMap<String, AgentState>,
    /// `None` until lazily loaded from the store.
    costs: Option<HashMap<String, f64>>,
    agent_runs: Option<Vec<AgentRunSummary>>,
    /// Latest commit id per (collection, doc id).
    cids: HashMap<(String, String), String>,
}

/// The per-book aggregate.
pub struct BookState {
    id: String,
    config: BookConfig,
    store: Option<Arc<dyn StateStore>>,
    inner: RwLock<BookInner>,
}

impl BookState {
    pub fn new(id: impl Into<String>, config: BookConfig) -> Self {
        Self {
            id: id.into(),
            config,
            store: None,
            inner: RwLock::new(BookInner::default()),
        }
    }

    pub fn with_store(
        id: impl Into<String>,
        config: BookConfig,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            store: Some(store),
            inner: RwLock::new(BookInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BookInner> {
        self.inner.read().expect("book lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, BookInner> {
        self.inner.write().expect("book lock poisoned")
    }

    // ---- identity & configuration -------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    pub fn total_pages(&self) -> u32 {
        self.config.total_pages
    }

    pub fn ocr_providers(&self) -> &[String] {
        &self.config.ocr_providers
    }

    pub fn store(&self) -> Option<&Arc<dyn StateStore>> {
        self.store.as_ref()
    }

    pub fn status(&self) -> BookStatus {
        self.read().status
    }

    pub fn set_status(&self, status: BookStatus) {
        self.write().status = status;
    }

    pub fn metadata(&self) -> BookMetadata {
        self.read().metadata.clone()
    }

    pub fn set_metadata(&self, metadata: BookMetadata) {
        self.write().metadata = metadata;
    }

    // ---- page map ------------------------------------------------------

    pub fn page(&self, page_num: u32) -> Option<Arc<PageState>> {
        self.read().pages.get(&page_num).cloned()
    }

    /// Idempotent under racing callers: the first creator wins and every
    /// caller receives the same pointer.
    pub fn get_or_create_page(&self, page_num: u32) -> Arc<PageState> {
        let mut inner = self.write();
        inner
            .pages
            .entry(page_num)
            .or_insert_with(|| Arc::new(PageState::new(page_num)))
            .clone()
    }

    /// Invoke `f` for each page in page order while holding a shared lock.
    /// `f` must not call back into this book.
    pub fn for_each_page(&self, mut f: impl FnMut(&Arc<PageState>)) {
        let inner = self.read();
        let mut nums: Vec<u32> = inner.pages.keys().copied().collect();
        nums.sort_unstable();
        for num in nums {
            if let Some(page) = inner.pages.get(&num) {
                f(page);
            }
        }
    }

    pub fn count_pages(&self) -> usize {
        self.read().pages.len()
    }

    /// Pages for which every configured OCR provider has completed.
    pub fn count_ocr_pages(&self) -> usize {
        let inner = self.read();
        inner
            .pages
            .values()
            .filter(|page| page.all_ocr_done(&self.config.ocr_providers))
            .count()
    }

    /// True when every in-memory page has all providers done AND the page
    /// map covers the whole book (guards against not-yet-created rows).
    pub fn all_pages_ocr_complete(&self) -> bool {
        let inner = self.read();
        if (inner.pages.len() as u32) < self.config.total_pages {
            return false;
        }
        inner
            .pages
            .values()
            .all(|page| page.all_ocr_done(&self.config.ocr_providers))
    }

    /// True iff every page `1..=min(n, total_pages)` has all providers
    /// done. Missing pages count as incomplete.
    pub fn consecutive_pages_complete(&self, n: u32) -> bool {
        let upper = n.min(self.config.total_pages);
        let inner = self.read();
        (1..=upper).all(|num| {
            inner
                .pages
                .get(&num)
                .map(|page| page.all_ocr_done(&self.config.ocr_providers))
                .unwrap_or(false)
        })
    }

    // ---- operations ----------------------------------------------------

    pub fn op_start(&self, op: OpKind) -> Result<(), StateError> {
        self.write()
            .ops
            .entry(op)
            .or_default()
            .start(op.as_str())
    }

    pub fn op_complete(&self, op: OpKind) {
        self.write().ops.entry(op).or_default().complete();
    }

    /// Returns true when the operation is now terminally failed.
    pub fn op_fail(&self, op: OpKind) -> bool {
        let max = self.config.max_retries;
        self.write().ops.entry(op).or_default().fail(max)
    }

    pub fn op_reset(&self, op: OpKind) {
        self.write().ops.entry(op).or_default().reset();
    }

    pub fn op_can_start(&self, op: OpKind) -> bool {
        self.read().ops.get(&op).map(|o| o.can_start()).unwrap_or(true)
    }

    pub fn op_is_started(&self, op: OpKind) -> bool {
        self.read().ops.get(&op).map(|o| o.is_started()).unwrap_or(false)
    }

    pub fn op_is_complete(&self, op: OpKind) -> bool {
        self.read().ops.get(&op).map(|o| o.is_complete()).unwrap_or(false)
    }

    pub fn op_is_failed(&self, op: OpKind) -> bool {
        self.read().ops.get(&op).map(|o| o.is_failed()).unwrap_or(false)
    }

    pub fn op_is_done(&self, op: OpKind) -> bool {
        self.read().ops.get(&op).map(|o| o.is_done()).unwrap_or(false)
    }

    pub fn op_retries(&self, op: OpKind) -> u32 {
        self.read().ops.get(&op).map(|o| o.retries()).unwrap_or(0)
    }

    /// The four persisted flag values for an operation.
    pub fn op_flags(&self, op: OpKind) -> (bool, bool, bool, u32) {
        self.read()
            .ops
            .get(&op)
            .copied()
            .unwrap_or_default()
            .flags()
    }

    /// Restore an operation's state at load time.
    pub fn set_op_state(&self, op: OpKind, state: OperationState) {
        self.write().ops.insert(op, state);
    }

    /// Target document id for an operation's persisted flags. `None`
    /// means the owning document does not exist yet.
    pub fn op_doc_id(&self, op: OpKind) -> Option<String> {
        match op.spec().collection {
            c if c == collections::BOOK => Some(self.id.clone()),
            _ => self.read().toc.doc_id.clone(),
        }
    }

    // ---- ToC discovery -------------------------------------------------

    pub fn toc_doc_id(&self) -> Option<String> {
        self.read().toc.doc_id.clone()
    }

    pub fn set_toc_doc_id(&self, doc_id: impl Into<String>) {
        self.write().toc.doc_id = Some(doc_id.into());
    }

    /// Atomic triple-set from the ToC finder's result.
    pub fn set_toc_result(&self, found: bool, start_page: Option<u32>, end_page: Option<u32>) {
        let mut inner = self.write();
        inner.toc.found = found;
        inner.toc.start_page = start_page;
        inner.toc.end_page = end_page;
    }

    pub fn toc_found(&self) -> bool {
        self.read().toc.found
    }

    pub fn toc_page_range(&self) -> Option<(u32, u32)> {
        let inner = self.read();
        match (inner.toc.start_page, inner.toc.end_page) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn structure_summary(&self) -> Option<String> {
        self.read().toc.structure_summary.clone()
    }

    pub fn set_structure_summary(&self, summary: Option<String>) {
        self.write().toc.structure_summary = summary;
    }

    pub fn finalize_phase(&self) -> Option<String> {
        self.read().toc.finalize_phase.clone()
    }

    pub fn set_finalize_phase(&self, phase: impl Into<String>) {
        self.write().toc.finalize_phase = Some(phase.into());
    }

    pub fn clear_finalize_phase(&self) {
        self.write().toc.finalize_phase = None;
    }

    /// Clear discovery results (reset of the finder stage).
    pub fn clear_toc_result(&self) {
        let mut inner = self.write();
        inner.toc.found = false;
        inner.toc.start_page = None;
        inner.toc.end_page = None;
        inner.toc.structure_summary = None;
    }

    // ---- ToC entries ---------------------------------------------------

    /// Extracted entries, pre-filtered to unlinked at load. Returns a
    /// copy; `None` when extraction has not produced entries.
    pub fn toc_entries(&self) -> Option<Vec<TocEntry>> {
        self.read().toc_entries.clone()
    }

    pub fn set_toc_entries(&self, entries: Vec<TocEntry>) {
        self.write().toc_entries = Some(entries);
    }

    pub fn clear_toc_entries(&self) {
        self.write().toc_entries = None;
    }

    /// Entries from the extraction set that have no page link yet.
    pub fn unlinked_toc_entries(&self) -> Vec<TocEntry> {
        self.read()
            .toc_entries
            .as_deref()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| !e.is_linked())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The full entry set carried through link and finalize. Copy.
    pub fn linked_entries(&self) -> Vec<TocEntry> {
        self.read().linked_entries.clone()
    }

    pub fn set_linked_entries(&self, entries: Vec<TocEntry>) {
        self.write().linked_entries = entries;
    }

    pub fn clear_linked_entries(&self) {
        self.write().linked_entries.clear();
    }

    /// Replace one linked entry in place, matched by document id.
    pub fn update_linked_entry(&self, entry: TocEntry) -> Result<(), StateError> {
        let mut inner = self.write();
        let target = entry
            .doc_id
            .clone()
            .ok_or(StateError::EmptyField { field: "doc_id" })?;
        match inner
            .linked_entries
            .iter_mut()
            .find(|e| e.doc_id.as_deref() == Some(target.as_str()))
        {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(StateError::UnknownEntry(target)),
        }
    }

    /// Write a confirmed page link into the cached entry lists.
    pub(crate) fn apply_entry_link(
        &self,
        entry_doc_id: &str,
        page_doc_id: &str,
        page_num: u32,
    ) -> bool {
        let mut inner = self.write();
        let mut found = false;
        for entry in inner
            .linked_entries
            .iter_mut()
            .filter(|e| e.doc_id.as_deref() == Some(entry_doc_id))
        {
            entry.actual_page_id = Some(page_doc_id.to_string());
            entry.actual_page_num = Some(page_num);
            found = true;
        }
        if let Some(entries) = inner.toc_entries.as_mut() {
            for entry in entries
                .iter_mut()
                .filter(|e| e.doc_id.as_deref() == Some(entry_doc_id))
            {
                entry.actual_page_id = Some(page_doc_id.to_string());
                entry.actual_page_num = Some(page_num);
                found = true;
            }
        }
        found
    }

    /// Commit confirmed sort orders after a resort write succeeded.
    pub(crate) fn apply_sort_orders(&self, updates: &[(String, i64)]) {
        let mut inner = self.write();
        for (doc_id, sort_order) in updates {
            for entry in inner
                .linked_entries
                .iter_mut()
                .filter(|e| e.doc_id.as_deref() == Some(doc_id.as_str()))
            {
                entry.sort_order = *sort_order;
            }
            if let Some(entries) = inner.toc_entries.as_mut() {
                for entry in entries
                    .iter_mut()
                    .filter(|e| e.doc_id.as_deref() == Some(doc_id.as_str()))
                {
                    entry.sort_order = *sort_order;
                }
            }
        }
        inner
            .linked_entries
            .sort_by_key(|entry| entry.sort_order);
    }

    /// Drop every cached page link (link-stage reset).
    pub(crate) fn clear_entry_links_in_memory(&self) {
        let mut inner = self.write();
        for entry in inner.linked_entries.iter_mut() {
            entry.actual_page_id = None;
            entry.actual_page_num = None;
        }
        if let Some(entries) = inner.toc_entries.as_mut() {
            for entry in entries.iter_mut() {
                entry.actual_page_id = None;
                entry.actual_page_num = None;
            }
        }
    }

    // ---- link / finalize sub-state ------------------------------------

    pub fn increment_entries_linked(&self) {
        self.write().link.entries_linked += 1;
    }

    pub fn increment_entries_skipped(&self) {
        self.write().link.entries_skipped += 1;
    }

    /// (linked, skipped)
    pub fn link_counters(&self) -> (u32, u32) {
        let inner = self.read();
        (inner.link.entries_linked, inner.link.entries_skipped)
    }

    pub fn set_link_counters(&self, linked: u32, skipped: u32) {
        let mut inner = self.write();
        inner.link.entries_linked = linked;
        inner.link.entries_skipped = skipped;
    }

    pub fn pattern_result(&self) -> Option<PatternResult> {
        self.read().finalize.pattern.clone()
    }

    pub fn set_pattern_result(&self, pattern: Option<PatternResult>) {
        self.write().finalize.pattern = pattern;
    }

    pub fn entries_to_find(&self) -> Vec<EntryToFind> {
        self.read().finalize.entries_to_find.clone()
    }

    pub fn set_entries_to_find(&self, entries: Vec<EntryToFind>) {
        self.write().finalize.entries_to_find = entries;
    }

    pub fn gaps(&self) -> Vec<GapRange> {
        self.read().finalize.gaps.clone()
    }

    pub fn set_gaps(&self, gaps: Vec<GapRange>) {
        self.write().finalize.gaps = gaps;
    }

    pub fn increment_chapters_found(&self) {
        self.write().finalize.chapters_found += 1;
    }

    pub fn increment_gaps_investigated(&self) {
        self.write().finalize.gaps_investigated += 1;
    }

    /// (chapters_found, gaps_investigated)
    pub fn finalize_counters(&self) -> (u32, u32) {
        let inner = self.read();
        (
            inner.finalize.chapters_found,
            inner.finalize.gaps_investigated,
        )
    }

    pub fn set_finalize_counters(&self, chapters_found: u32, gaps_investigated: u32) {
        let mut inner = self.write();
        inner.finalize.chapters_found = chapters_found;
        inner.finalize.gaps_investigated = gaps_investigated;
    }

    /// Zero all finalize sub-state (reset path).
    pub fn clear_finalize_state(&self) {
        let mut inner = self.write();
        inner.finalize = FinalizeState::default();
        inner.toc.finalize_phase = None;
    }

    // ---- structure -----------------------------------------------------

    pub fn structure_phase(&self) -> Option<String> {
        self.read().structure.phase.clone()
    }

    pub fn set_structure_phase(&self, phase: impl Into<String>) {
        self.write().structure.phase = Some(phase.into());
    }

    /// Deep copies of the chapter list.
    pub fn structure_chapters(&self) -> Vec<Chapter> {
        self.read().structure.chapters.clone()
    }

    pub fn set_structure_chapters(&self, chapters: Vec<Chapter>) {
        self.write().structure.chapters = chapters;
    }

    /// Replace a chapter in place, matched by doc id or ToC entry id.
    pub fn update_chapter(&self, chapter: Chapter) -> Result<(), StateError> {
        let mut inner = self.write();
        let slot = inner.structure.chapters.iter_mut().find(|existing| {
            if chapter.doc_id.is_some() && existing.doc_id == chapter.doc_id {
                return true;
            }
            chapter.entry_id.is_some() && existing.entry_id == chapter.entry_id
        });
        match slot {
            Some(existing) => {
                *existing = chapter;
                Ok(())
            }
            None => Err(StateError::UnknownChapter(
                chapter
                    .entry_id
                    .or(chapter.doc_id)
                    .unwrap_or_else(|| chapter.title.clone()),
            )),
        }
    }

    pub fn clear_structure_chapters(&self) {
        let mut inner = self.write();
        inner.structure = StructureState::default();
    }

    pub fn add_classify_reasoning(&self, reasoning: impl Into<String>) {
        self.write()
            .structure
            .classify_reasonings
            .push(reasoning.into());
    }

    pub fn classify_reasonings(&self) -> Vec<String> {
        self.read().structure.classify_reasonings.clone()
    }

    pub fn increment_chapters_extracted(&self) {
        self.write().structure.chapters_extracted += 1;
    }

    pub fn increment_chapters_classified(&self) {
        self.write().structure.chapters_classified += 1;
    }

    pub fn increment_chapters_polished(&self) {
        self.write().structure.chapters_polished += 1;
    }

    pub fn increment_polish_failures(&self) {
        self.write().structure.polish_failures += 1;
    }

    /// (extracted, classified, polished, polish_failures)
    pub fn structure_counters(&self) -> (u32, u32, u32, u32) {
        let s = &self.read().structure;
        (
            s.chapters_extracted,
            s.chapters_classified,
            s.chapters_polished,
            s.polish_failures,
        )
    }

    pub fn set_structure_counters(
        &self,
        extracted: u32,
        classified: u32,
        polished: u32,
        polish_failures: u32,
    ) {
        let mut inner = self.write();
        inner.structure.chapters_extracted = extracted;
        inner.structure.chapters_classified = classified;
        inner.structure.chapters_polished = polished;
        inner.structure.polish_failures = polish_failures;
    }

    // ---- agents --------------------------------------------------------

    pub fn set_agent_state(&self, state: AgentState) {
        let key = state.state_key();
        self.write().agents.insert(key, state);
    }

    pub fn agent_state(
        &self,
        kind: crate::models::AgentKind,
        entry_doc_id: Option<&str>,
    ) -> Option<AgentState> {
        let key = match entry_doc_id {
            Some(entry) => format!("{}:{}", kind.as_str(), entry),
            None => kind.as_str().to_string(),
        };
        self.read().agents.get(&key).cloned()
    }

    /// Remove all checkpoints whose key is the kind exactly or starts
    /// with `kind:`.
    pub fn clear_agent_states(&self, kind: crate::models::AgentKind) {
        let prefix = format!("{}:", kind.as_str());
        self.write()
            .agents
            .retain(|key, _| key != kind.as_str() && !key.starts_with(&prefix));
    }

    pub fn agent_state_count(&self) -> usize {
        self.read().agents.len()
    }

    // ---- costs ---------------------------------------------------------

    /// Record spend for a stage. Non-positive amounts are ignored.
    pub fn add_cost(&self, stage: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let mut inner = self.write();
        *inner
            .costs
            .get_or_insert_with(HashMap::new)
            .entry(stage.to_string())
            .or_insert(0.0) += amount;
    }

    pub fn total_cost(&self) -> f64 {
        self.read()
            .costs
            .as_ref()
            .map(|costs| costs.values().sum())
            .unwrap_or(0.0)
    }

    /// Per-stage costs. Copy.
    pub fn costs_by_stage(&self) -> HashMap<String, f64> {
        self.read().costs.clone().unwrap_or_default()
    }

    pub fn costs_loaded(&self) -> bool {
        self.read().costs.is_some()
    }

    pub fn set_costs(&self, costs: HashMap<String, f64>) {
        self.write().costs = Some(costs);
    }

    // ---- agent run summaries -------------------------------------------

    pub fn add_agent_run(&self, run: AgentRunSummary) {
        self.write()
            .agent_runs
            .get_or_insert_with(Vec::new)
            .push(run);
    }

    pub fn agent_runs(&self) -> Vec<AgentRunSummary> {
        self.read().agent_runs.clone().unwrap_or_default()
    }

    pub fn agent_runs_loaded(&self) -> bool {
        self.read().agent_runs.is_some()
    }

    pub fn set_agent_runs(&self, runs: Vec<AgentRunSummary>) {
        self.write().agent_runs = Some(runs);
    }

    // ---- CID index -----------------------------------------------------

    pub fn book_cid(&self) -> Option<String> {
        self.read().book_cid.clone()
    }

    pub fn toc_cid(&self) -> Option<String> {
        self.read().toc.cid.clone()
    }

    pub fn cid_for(&self, collection: &str, doc_id: &str) -> Option<String> {
        self.read()
            .cids
            .get(&(collection.to_string(), doc_id.to_string()))
            .cloned()
    }

    /// Record a committed write: update the CID index and route the cid
    /// to the matching in-memory object, when one is cached.
    pub fn track_write(&self, collection: &str, doc_id: &str, cid: &str) {
        let mut inner = self.write();
        inner
            .cids
            .insert((collection.to_string(), doc_id.to_string()), cid.to_string());

        match collection {
            c if c == collections::BOOK => {
                if doc_id == self.id {
                    inner.book_cid = Some(cid.to_string());
                }
            }
            c if c == collections::TOC => {
                if inner.toc.doc_id.as_deref() == Some(doc_id) {
                    inner.toc.cid = Some(cid.to_string());
                }
            }
            c if c == collections::PAGE => {
                // page locks nest inside the book lock in this direction
                if let Some(page) = inner
                    .pages
                    .values()
                    .find(|p| p.doc_id().as_deref() == Some(doc_id))
                {
                    page.set_cid(cid);
                }
            }
            c if c == collections::CHAPTER => {
                if let Some(chapter) = inner
                    .structure
                    .chapters
                    .iter_mut()
                    .find(|ch| ch.doc_id.as_deref() == Some(doc_id))
                {
                    chapter.cid = Some(cid.to_string());
                }
            }
            c if c == collections::AGENT_STATE => {
                if let Some(agent) = inner
                    .agents
                    .values_mut()
                    .find(|a| a.doc_id.as_deref() == Some(doc_id))
                {
                    agent.cid = Some(cid.to_string());
                }
            }
            _ => {}
        }
    }
}
