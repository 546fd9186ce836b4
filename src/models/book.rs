//! Book-level models: processing status and bibliographic metadata.

use serde::{Deserialize, Serialize};

/// Processing status of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Default for BookStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Bibliographic metadata extracted from the book's front matter.
///
/// Every field is optional; the metadata agent fills in what it can find
/// and the persister writes only the fields it was asked to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
}

impl BookMetadata {
    /// Field names recognised by the metadata persister.
    pub const FIELDS: [&'static str; 6] = [
        "title",
        "authors",
        "isbn",
        "publication_year",
        "description",
        "subjects",
    ];
}
