//! Thread-safe per-page state record.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};
use tracing::warn;

use crate::text::Heading;

#[derive(Debug, Default)]
struct PageInner {
    doc_id: Option<String>,
    cid: Option<String>,
    extracted: bool,
    /// Per-provider OCR text. Presence of a key means that provider is
    /// done for this page; an empty string is a valid blank-page result.
    ocr_texts: HashMap<String, String>,
    ocr_markdown: Option<String>,
    headings: Option<Vec<Heading>>,
    header: Option<String>,
    footer: Option<String>,
    is_toc_page: bool,
    /// Whether the full page document has been ingested from the store.
    data_loaded: bool,
}

/// Mutable state for one sequential page, atomic under its own RW lock.
///
/// The book lock is always taken before a page lock, never inside one.
#[derive(Debug)]
pub struct PageState {
    page_num: u32,
    inner: RwLock<PageInner>,
}

impl PageState {
    pub fn new(page_num: u32) -> Self {
        Self {
            page_num,
            inner: RwLock::new(PageInner::default()),
        }
    }

    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PageInner> {
        self.inner.read().expect("page lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PageInner> {
        self.inner.write().expect("page lock poisoned")
    }

    /// Record a provider's OCR result. Marks the provider done.
    pub fn mark_ocr_complete(&self, provider: &str, text: impl Into<String>) {
        self.write().ocr_texts.insert(provider.to_string(), text.into());
    }

    /// Whether the given provider has completed for this page.
    pub fn ocr_complete(&self, provider: &str) -> bool {
        self.read().ocr_texts.contains_key(provider)
    }

    /// Whether every listed provider has completed for this page.
    pub fn all_ocr_done(&self, providers: &[String]) -> bool {
        let inner = self.read();
        providers.iter().all(|p| inner.ocr_texts.contains_key(p))
    }

    pub fn ocr_text(&self, provider: &str) -> Option<String> {
        self.read().ocr_texts.get(provider).cloned()
    }

    /// Snapshot of all provider results, sorted by provider name.
    pub fn ocr_texts(&self) -> Vec<(String, String)> {
        let inner = self.read();
        let mut texts: Vec<_> = inner
            .ocr_texts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        texts.sort_by(|a, b| a.0.cmp(&b.0));
        texts
    }

    pub fn set_extracted(&self, extracted: bool) {
        self.write().extracted = extracted;
    }

    pub fn is_extracted(&self) -> bool {
        self.read().extracted
    }

    pub fn set_header(&self, header: Option<String>) {
        self.write().header = header;
    }

    pub fn header(&self) -> Option<String> {
        self.read().header.clone()
    }

    pub fn set_footer(&self, footer: Option<String>) {
        self.write().footer = footer;
    }

    pub fn footer(&self) -> Option<String> {
        self.read().footer.clone()
    }

    pub fn set_ocr_markdown(&self, markdown: impl Into<String>) {
        self.write().ocr_markdown = Some(markdown.into());
    }

    pub fn ocr_markdown(&self) -> Option<String> {
        self.read().ocr_markdown.clone()
    }

    /// Whether the reconciled markdown has been produced. The markdown may
    /// legitimately be empty for blank pages, so this checks presence.
    pub fn blend_complete(&self) -> bool {
        self.read().ocr_markdown.is_some()
    }

    pub fn set_headings(&self, headings: Vec<Heading>) {
        self.write().headings = Some(headings);
    }

    /// Returns a fresh copy of the cached headings.
    pub fn headings(&self) -> Option<Vec<Heading>> {
        self.read().headings.clone()
    }

    pub fn set_doc_id(&self, doc_id: impl Into<String>) {
        self.write().doc_id = Some(doc_id.into());
    }

    pub fn doc_id(&self) -> Option<String> {
        self.read().doc_id.clone()
    }

    pub fn set_cid(&self, cid: impl Into<String>) {
        self.write().cid = Some(cid.into());
    }

    pub fn cid(&self) -> Option<String> {
        self.read().cid.clone()
    }

    pub fn set_toc_page(&self, is_toc: bool) {
        self.write().is_toc_page = is_toc;
    }

    pub fn is_toc_page(&self) -> bool {
        self.read().is_toc_page
    }

    pub fn is_data_loaded(&self) -> bool {
        self.read().data_loaded
    }

    pub fn mark_data_loaded(&self) {
        self.write().data_loaded = true;
    }

    /// Write-through from the blend completion handler: markdown, cached
    /// headings, and the data-loaded mark in one atomic step.
    pub fn set_blend_result(&self, markdown: impl Into<String>, headings: Vec<Heading>) {
        let mut inner = self.write();
        inner.ocr_markdown = Some(markdown.into());
        inner.headings = Some(headings);
        inner.data_loaded = true;
    }

    /// Clear all OCR-derived state (provider texts, markdown, headings).
    pub fn clear_ocr(&self) {
        let mut inner = self.write();
        inner.ocr_texts.clear();
        inner.ocr_markdown = None;
        inner.headings = None;
        inner.header = None;
        inner.footer = None;
    }

    /// Ingest a page document from the store, best-effort. Missing or
    /// wrong-typed fields are skipped; a heading-JSON parse failure is
    /// logged and the cached headings stay unset.
    pub fn populate_from_db(&self, fields: &Map<String, Value>) {
        let mut inner = self.write();

        if let Some(extracted) = fields.get("extract_complete").and_then(Value::as_bool) {
            inner.extracted = extracted;
        }
        if let Some(markdown) = fields.get("ocr_markdown").and_then(Value::as_str) {
            inner.ocr_markdown = Some(markdown.to_string());
        }
        if let Some(raw) = fields.get("headings").and_then(Value::as_str) {
            if !raw.is_empty() {
                match serde_json::from_str::<Vec<Heading>>(raw) {
                    Ok(headings) => inner.headings = Some(headings),
                    Err(e) => {
                        warn!(page = self.page_num, "unparseable headings JSON: {e}");
                    }
                }
            }
        }
        if let Some(header) = fields.get("header").and_then(Value::as_str) {
            inner.header = Some(header.to_string());
        }
        if let Some(footer) = fields.get("footer").and_then(Value::as_str) {
            inner.footer = Some(footer.to_string());
        }
        if let Some(is_toc) = fields.get("is_toc_page").and_then(Value::as_bool) {
            inner.is_toc_page = is_toc;
        }
        inner.data_loaded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn providers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn provider_presence_is_completion() {
        let page = PageState::new(1);
        let provs = providers(&["a", "b"]);
        assert!(!page.all_ocr_done(&provs));

        page.mark_ocr_complete("a", "some text");
        assert!(page.ocr_complete("a"));
        assert!(!page.all_ocr_done(&provs));

        // empty string still counts as done
        page.mark_ocr_complete("b", "");
        assert!(page.all_ocr_done(&provs));
    }

    #[test]
    fn headings_accessor_returns_copy() {
        let page = PageState::new(2);
        page.set_headings(vec![Heading {
            level: 1,
            text: "Chapter One".into(),
        }]);
        let mut copy = page.headings().unwrap();
        copy[0].text = "mutated".into();
        assert_eq!(page.headings().unwrap()[0].text, "Chapter One");
    }

    #[test]
    fn populate_tolerates_missing_and_mistyped_fields() {
        let page = PageState::new(3);
        let fields = json!({
            "extract_complete": true,
            "ocr_markdown": 42,             // wrong type, skipped
            "headings": "not valid json",   // parse failure, skipped
            "header": "RUNNING HEADER"
        });
        let Value::Object(map) = fields else { unreachable!() };
        page.populate_from_db(&map);

        assert!(page.is_extracted());
        assert_eq!(page.ocr_markdown(), None);
        assert_eq!(page.headings(), None);
        assert_eq!(page.header().as_deref(), Some("RUNNING HEADER"));
        assert!(page.is_data_loaded());
    }

    #[test]
    fn blend_result_sets_markdown_headings_and_loaded() {
        let page = PageState::new(4);
        page.set_blend_result(
            "# Title\n\nbody",
            vec![Heading {
                level: 1,
                text: "Title".into(),
            }],
        );
        assert!(page.blend_complete());
        assert!(page.is_data_loaded());
        assert_eq!(page.headings().unwrap().len(), 1);
    }

    #[test]
    fn clear_ocr_resets_derived_state() {
        let page = PageState::new(5);
        page.mark_ocr_complete("a", "text");
        page.set_blend_result("md", vec![]);
        page.set_header(Some("H".into()));
        page.clear_ocr();
        assert!(!page.ocr_complete("a"));
        assert_eq!(page.ocr_markdown(), None);
        assert_eq!(page.headings(), None);
        assert_eq!(page.header(), None);
    }
}
