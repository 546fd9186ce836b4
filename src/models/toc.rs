//! Table-of-contents entry models.

use serde::{Deserialize, Serialize};

/// How a ToC entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Parsed out of the book's printed table of contents.
    Extracted,
    /// Found by an agent while walking pages (missing from the printed ToC).
    Discovered,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracted => "extracted",
            Self::Discovered => "discovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extracted" => Some(Self::Extracted),
            "discovered" => Some(Self::Discovered),
            _ => None,
        }
    }
}

/// One entry of the reconciled table of contents.
///
/// Entries start life unlinked (no `actual_page_*`); the link stage attaches
/// them to physical Page documents as they are located.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Store document id, `None` until persisted.
    pub doc_id: Option<String>,
    /// Owning ToC document id.
    pub toc_id: String,
    /// Stable position within the ToC.
    pub sort_order: i64,
    pub title: String,
    /// 1 = part, 2 = chapter, deeper levels for sections.
    pub level: u32,
    /// Human name for the level ("Part", "Chapter", ...).
    pub level_name: Option<String>,
    /// Printed entry number or label ("IV", "12", "A.2").
    pub entry_number: Option<String>,
    /// Page number string as printed in the ToC.
    pub printed_page: Option<String>,
    /// Linked physical page document, once located.
    pub actual_page_id: Option<String>,
    /// Sequential page number of the linked page.
    pub actual_page_num: Option<u32>,
    pub source: EntrySource,
}

impl TocEntry {
    pub fn new(toc_id: impl Into<String>, sort_order: i64, title: impl Into<String>) -> Self {
        Self {
            doc_id: None,
            toc_id: toc_id.into(),
            sort_order,
            title: title.into(),
            level: 2,
            level_name: None,
            entry_number: None,
            printed_page: None,
            actual_page_id: None,
            actual_page_num: None,
            source: EntrySource::Extracted,
        }
    }

    /// Upsert key, stable for a given (toc, position) pair.
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.toc_id, self.sort_order)
    }

    pub fn is_linked(&self) -> bool {
        self.actual_page_id.is_some()
    }
}

/// A ToC entry the finalize stage still needs to locate in the page stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryToFind {
    pub title: String,
    pub level: u32,
    pub entry_number: Option<String>,
    pub printed_page: Option<String>,
}
