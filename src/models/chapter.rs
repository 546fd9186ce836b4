//! Chapter models: a ToC entry promoted into a processing unit.

use serde::{Deserialize, Serialize};

/// Which matter of the book a chapter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatterType {
    Front,
    Body,
    Back,
}

impl MatterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Body => "body",
            Self::Back => "back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "front" => Some(Self::Front),
            "body" => Some(Self::Body),
            "back" => Some(Self::Back),
            _ => None,
        }
    }
}

/// Fine-grained content classification of a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TitlePage,
    Copyright,
    Dedication,
    Epigraph,
    TableOfContents,
    Foreword,
    Preface,
    Acknowledgments,
    Introduction,
    Body,
    Appendix,
    Notes,
    Glossary,
    Bibliography,
    Index,
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitlePage => "title_page",
            Self::Copyright => "copyright",
            Self::Dedication => "dedication",
            Self::Epigraph => "epigraph",
            Self::TableOfContents => "table_of_contents",
            Self::Foreword => "foreword",
            Self::Preface => "preface",
            Self::Acknowledgments => "acknowledgments",
            Self::Introduction => "introduction",
            Self::Body => "body",
            Self::Appendix => "appendix",
            Self::Notes => "notes",
            Self::Glossary => "glossary",
            Self::Bibliography => "bibliography",
            Self::Index => "index",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "title_page" => Some(Self::TitlePage),
            "copyright" => Some(Self::Copyright),
            "dedication" => Some(Self::Dedication),
            "epigraph" => Some(Self::Epigraph),
            "table_of_contents" => Some(Self::TableOfContents),
            "foreword" => Some(Self::Foreword),
            "preface" => Some(Self::Preface),
            "acknowledgments" => Some(Self::Acknowledgments),
            "introduction" => Some(Self::Introduction),
            "body" => Some(Self::Body),
            "appendix" => Some(Self::Appendix),
            "notes" => Some(Self::Notes),
            "glossary" => Some(Self::Glossary),
            "bibliography" => Some(Self::Bibliography),
            "index" => Some(Self::Index),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A chapter being carried through extract, classify, and polish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Store document id, `None` until the skeleton is persisted.
    pub doc_id: Option<String>,
    /// Latest store commit id for this chapter.
    pub cid: Option<String>,
    /// ToC entry this chapter was promoted from; `None` for orphans
    /// discovered between linked entries.
    pub entry_id: Option<String>,
    pub title: String,
    pub level: u32,
    /// Inclusive sequential page range.
    pub start_page: u32,
    pub end_page: u32,
    pub matter: Option<MatterType>,
    pub content_type: Option<ContentType>,
    /// Whether this chapter should be included in audio output.
    pub audio_include: Option<bool>,
    /// Raw text merged from the chapter's pages.
    pub mechanical_text: Option<String>,
    /// Polished text after the polish agent has run.
    pub polished_text: Option<String>,
    pub word_count: u32,
    pub extract_done: bool,
    pub polish_done: bool,
    pub polish_failed: bool,
    /// Position used for orphan chapter keys.
    pub sort_order: i64,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start_page: u32, end_page: u32) -> Self {
        Self {
            doc_id: None,
            cid: None,
            entry_id: None,
            title: title.into(),
            level: 2,
            start_page,
            end_page,
            matter: None,
            content_type: None,
            audio_include: None,
            mechanical_text: None,
            polished_text: None,
            word_count: 0,
            extract_done: false,
            polish_done: false,
            polish_failed: false,
            sort_order: 0,
        }
    }

    /// Upsert key: entry-backed chapters key on the entry, orphans on their
    /// position so re-running structure discovery stays idempotent.
    pub fn unique_key(&self, book_id: &str) -> String {
        match &self.entry_id {
            Some(entry_id) => format!("{book_id}:{entry_id}"),
            None => format!("{book_id}:orphan:{}", self.sort_order),
        }
    }
}
