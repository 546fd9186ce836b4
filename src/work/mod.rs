//! Work units handed to the external scheduler.
//!
//! The scheduler only needs enough to route a unit (CPU / OCR / LLM
//! pools) and to attribute the completion back to a book, stage, and
//! item. Everything stage-specific rides in the payload.

mod factory;

pub use factory::{
    create_blend_work_unit, create_classify_work_unit, create_extract_work_unit,
    create_label_work_unit, create_metadata_work_unit, create_ocr_work_unit,
    create_polish_work_unit, create_toc_extract_work_unit,
};

use std::path::PathBuf;

use uuid::Uuid;

use crate::models::PatternContext;

/// Which worker pool executes a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Cpu,
    Ocr,
    Llm,
}

/// Attribution record carried by every unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkMetrics {
    pub book_id: String,
    pub stage: String,
    /// What the unit operates on: "page:12", "chapter:book1:entry-3", ...
    pub item_key: String,
    pub prompt_key: Option<String>,
    pub prompt_cid: Option<String>,
}

/// Stage-specific inputs.
#[derive(Debug, Clone)]
pub enum WorkPayload {
    /// Rasterize one PDF page to PNG.
    ExtractPage {
        page_num: u32,
        pdf_path: PathBuf,
        /// Zero-based page index within that PDF.
        pdf_page_index: u32,
        output_path: PathBuf,
    },
    /// Run one OCR provider over a rasterized page.
    OcrPage {
        page_num: u32,
        image_path: PathBuf,
        image: Vec<u8>,
    },
    /// Reconcile per-provider texts into markdown.
    BlendPage {
        page_num: u32,
        provider_texts: Vec<(String, String)>,
    },
    /// Extract bibliographic metadata from the book's opening pages.
    Metadata { pages_text: String, prompt: String },
    /// Parse the printed table of contents.
    TocExtract {
        pages_text: String,
        prompt: String,
        structure_summary: Option<String>,
    },
    /// Extract the printed label data for one page.
    Label {
        page_num: u32,
        markdown: String,
        context: PatternContext,
    },
    /// Classify the chapter skeleton.
    Classify { prompt: String },
    /// Polish one chapter's mechanical text.
    Polish { chapter_key: String, prompt: String },
}

/// An opaque dispatchable item for the external scheduler.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub id: Uuid,
    pub kind: WorkKind,
    /// The owning book's id.
    pub job_id: String,
    /// Lower value runs earlier.
    pub priority: u8,
    /// OCR provider name for OCR units.
    pub provider: Option<String>,
    pub payload: WorkPayload,
    pub metrics: WorkMetrics,
}

/// Pipeline stages in execution order. Earlier stages get higher
/// priority (lower number) so the front of the pipeline drains first.
pub const STAGE_ORDER: [&str; 11] = [
    "extract",
    "ocr",
    "blend",
    "metadata",
    "toc_finder",
    "toc_extract",
    "toc_link",
    "label",
    "toc_finalize",
    "classify",
    "polish",
];

/// Map a stage name to its scheduling priority. Unknown stages sort
/// after every known one.
pub fn priority_for_stage(stage: &str) -> u8 {
    STAGE_ORDER
        .iter()
        .position(|s| *s == stage)
        .map(|idx| idx as u8)
        .unwrap_or(STAGE_ORDER.len() as u8)
}
