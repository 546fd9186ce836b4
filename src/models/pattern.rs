//! Pattern analysis results and the per-page context derived from them.
//!
//! The finalize stage analyses the linked ToC to learn how the book is
//! paginated: where printed page 1 falls, which ranges are unexplained
//! gaps, and what running header each chapter carries. Label extraction
//! then asks for a [`PatternContext`] per page to prime its prompts.

use serde::{Deserialize, Serialize};

/// An inclusive range of sequential page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRange {
    pub start: u32,
    pub end: u32,
}

impl GapRange {
    pub fn contains(&self, page_num: u32) -> bool {
        page_num >= self.start && page_num <= self.end
    }
}

/// A chapter's page range with the running header expected inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRange {
    pub start: u32,
    pub end: u32,
    /// Running header text printed at the top of pages in this range.
    pub header: Option<String>,
    pub chapter_number: Option<String>,
    pub chapter_title: Option<String>,
}

impl ChapterRange {
    pub fn contains(&self, page_num: u32) -> bool {
        page_num >= self.start && page_num <= self.end
    }
}

/// Result of pattern analysis over the linked table of contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    /// Physical page on which printed page 1 falls. Pages before it are
    /// typically numbered with roman numerals or not at all.
    pub numbering_start_page: Option<u32>,
    /// Ranges no linked entry accounts for.
    pub gaps: Vec<GapRange>,
    pub chapters: Vec<ChapterRange>,
    /// First and last physical page of the body matter.
    pub body_start: Option<u32>,
    pub body_end: Option<u32>,
}

impl PatternResult {
    /// Derive the label-extraction priors for a single page.
    pub fn context_for(&self, page_num: u32) -> PatternContext {
        let expected_page_number = self
            .numbering_start_page
            .map(|start| i64::from(page_num) - i64::from(start) + 1)
            .filter(|n| *n >= 1);

        let in_gap = self.gaps.iter().any(|g| g.contains(page_num));

        let chapter = self.chapters.iter().find(|c| c.contains(page_num));

        let content_type_hint = match (self.body_start, self.body_end) {
            (Some(start), _) if page_num < start => Some("front_matter".to_string()),
            (_, Some(end)) if page_num > end => Some("back_matter".to_string()),
            (Some(_), _) | (_, Some(_)) => Some("body".to_string()),
            (None, None) => None,
        };

        PatternContext {
            page_num,
            expected_page_number,
            in_gap,
            expected_header: chapter.and_then(|c| c.header.clone()),
            expected_chapter_number: chapter.and_then(|c| c.chapter_number.clone()),
            expected_chapter_title: chapter.and_then(|c| c.chapter_title.clone()),
            content_type_hint,
        }
    }
}

/// Per-page priors handed to the label work unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternContext {
    pub page_num: u32,
    /// Printed page number this page should carry, when numbering has begun.
    pub expected_page_number: Option<i64>,
    /// Whether the page falls inside a declared gap range.
    pub in_gap: bool,
    pub expected_header: Option<String>,
    pub expected_chapter_number: Option<String>,
    pub expected_chapter_title: Option<String>,
    /// "front_matter", "body", or "back_matter" based on body boundaries.
    pub content_type_hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> PatternResult {
        PatternResult {
            numbering_start_page: Some(9),
            gaps: vec![GapRange { start: 40, end: 42 }],
            chapters: vec![ChapterRange {
                start: 9,
                end: 30,
                header: Some("THE FIRST VOYAGE".into()),
                chapter_number: Some("1".into()),
                chapter_title: Some("The First Voyage".into()),
            }],
            body_start: Some(9),
            body_end: Some(200),
        }
    }

    #[test]
    fn expected_page_number_offsets_from_start() {
        let ctx = pattern().context_for(12);
        assert_eq!(ctx.expected_page_number, Some(4));
    }

    #[test]
    fn pages_before_numbering_start_have_no_expected_number() {
        let ctx = pattern().context_for(3);
        assert_eq!(ctx.expected_page_number, None);
        assert_eq!(ctx.content_type_hint.as_deref(), Some("front_matter"));
    }

    #[test]
    fn gap_membership_and_chapter_header() {
        let ctx = pattern().context_for(41);
        assert!(ctx.in_gap);
        assert_eq!(ctx.expected_header, None);

        let ctx = pattern().context_for(15);
        assert!(!ctx.in_gap);
        assert_eq!(ctx.expected_header.as_deref(), Some("THE FIRST VOYAGE"));
        assert_eq!(ctx.expected_chapter_number.as_deref(), Some("1"));
    }

    #[test]
    fn back_matter_hint_past_body_end() {
        let ctx = pattern().context_for(205);
        assert_eq!(ctx.content_type_hint.as_deref(), Some("back_matter"));
    }
}
