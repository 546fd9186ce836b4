//! Pure text and structure helpers: heading extraction, chapter page
//! merging, and polish text edits.

pub mod prompts;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// A markdown heading found on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Markdown level: 1 for `#`, 2 for `##`, ...
    pub level: u32,
    pub text: String,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("heading regex"))
}

/// Extract markdown headings from reconciled page text.
pub fn extract_headings(markdown: &str) -> Vec<Heading> {
    markdown
        .lines()
        .filter_map(|line| {
            heading_re().captures(line.trim_end()).map(|caps| Heading {
                level: caps[1].len() as u32,
                text: caps[2].trim().to_string(),
            })
        })
        .collect()
}

/// Whether a page's merged text ends in a hyphenated word break.
fn ends_hyphenated(text: &str) -> bool {
    let trimmed = text.trim_end();
    trimmed.ends_with('-')
        && trimmed
            .chars()
            .rev()
            .nth(1)
            .map(|c| c.is_alphabetic())
            .unwrap_or(false)
}

/// Whether the next page's text continues a hyphenated word.
fn continues_word(text: &str) -> bool {
    text.trim_start()
        .chars()
        .next()
        .map(|c| c.is_lowercase())
        .unwrap_or(false)
}

/// Merge a chapter's pages into one text, rejoining words split by a
/// line-break hyphen at a page boundary.
pub fn merge_pages(pages: &[String]) -> String {
    let mut merged = String::new();
    for page in pages {
        let page = page.trim();
        if page.is_empty() {
            continue;
        }
        if merged.is_empty() {
            merged.push_str(page);
        } else if ends_hyphenated(&merged) && continues_word(page) {
            let trimmed_len = merged.trim_end().len();
            merged.truncate(trimmed_len - 1);
            merged.push_str(page.trim_start());
        } else {
            merged.push_str("\n\n");
            merged.push_str(page);
        }
    }
    merged
}

/// Count whitespace-separated words, used for chapter word counts.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// One find/replace edit produced by the polish agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEdit {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Error)]
pub enum TextEditError {
    #[error("edit {index}: text to find not present: {snippet:?}")]
    NotFound { index: usize, snippet: String },
    #[error("edit {index}: empty find string")]
    EmptyFind { index: usize },
}

/// Apply edits in order. Each `find` must be present in the current text;
/// the first occurrence is replaced. Returns the edited text, leaving the
/// input untouched on error.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Result<String, TextEditError> {
    let mut result = text.to_string();
    for (index, edit) in edits.iter().enumerate() {
        if edit.find.is_empty() {
            return Err(TextEditError::EmptyFind { index });
        }
        match result.find(&edit.find) {
            Some(pos) => {
                result.replace_range(pos..pos + edit.find.len(), &edit.replace);
            }
            None => {
                let snippet: String = edit.find.chars().take(40).collect();
                return Err(TextEditError::NotFound { index, snippet });
            }
        }
    }
    Ok(result)
}
