//! Prompt construction and response schemas for the LLM stages.
//!
//! The agents themselves live outside this crate; the state engine builds
//! their prompts from cached state and validates their structured output
//! against these JSON schemas.

use serde_json::{json, Value};

use crate::models::Chapter;

/// Build the chapter classification prompt from the chapter skeleton.
pub fn build_classify_prompt(book_title: &str, chapters: &[Chapter]) -> String {
    let mut prompt = format!(
        "You are classifying the chapters of \"{book_title}\".\n\
         For each chapter decide its matter (front, body, back), its content \
         type, and whether it belongs in an audio edition.\n\nChapters:\n"
    );
    for (idx, chapter) in chapters.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. {:?} (level {}, pages {}-{})\n",
            idx + 1,
            chapter.title,
            chapter.level,
            chapter.start_page,
            chapter.end_page,
        ));
    }
    prompt
}

/// Build the polish prompt for one chapter's mechanical text.
pub fn build_polish_prompt(chapter_title: &str, mechanical_text: &str) -> String {
    format!(
        "Polish the OCR text of the chapter \"{chapter_title}\". Fix OCR \
         artifacts, rejoin broken words, and remove page furniture (running \
         headers, page numbers). Respond with a list of find/replace edits; \
         do not rewrite prose.\n\n---\n{mechanical_text}"
    )
}

/// Schema for the metadata agent's structured answer.
pub fn metadata_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "authors": {"type": "array", "items": {"type": "string"}},
            "isbn": {"type": "string"},
            "publication_year": {"type": "integer"},
            "description": {"type": "string"},
            "subjects": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["title", "authors"]
    })
}

/// Schema for the ToC extraction agent's entry list.
pub fn toc_entries_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "level": {"type": "integer", "minimum": 1},
                        "level_name": {"type": "string"},
                        "entry_number": {"type": "string"},
                        "printed_page": {"type": "string"}
                    },
                    "required": ["title", "level"]
                }
            }
        },
        "required": ["entries"]
    })
}

/// Schema for the classification agent's per-chapter verdicts.
pub fn classify_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "chapters": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer", "minimum": 1},
                        "matter": {"enum": ["front", "body", "back"]},
                        "content_type": {"type": "string"},
                        "audio_include": {"type": "boolean"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["index", "matter", "content_type", "audio_include"]
                }
            }
        },
        "required": ["chapters"]
    })
}

/// Schema for the polish agent's edit list.
pub fn polish_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "edits": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "find": {"type": "string", "minLength": 1},
                        "replace": {"type": "string"}
                    },
                    "required": ["find", "replace"]
                }
            }
        },
        "required": ["edits"]
    })
}

/// Schema for the label agent's per-page answer.
pub fn label_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "printed_page_number": {"type": "string"},
            "header": {"type": "string"},
            "footer": {"type": "string"},
            "is_toc_page": {"type": "boolean"}
        }
    })
}
