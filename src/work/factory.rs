//! Work-unit constructors.
//!
//! Each factory turns (book, page/provider/chapter) into a unit the
//! scheduler can execute. Inputs load state-first with a store fallback;
//! a factory returns `None` when its prerequisites are not met yet.

use tracing::debug;
use uuid::Uuid;

use crate::config::METADATA_PAGE_COUNT;
use crate::layout;
use crate::models::Chapter;
use crate::persist::PersistError;
use crate::state::BookState;
use crate::store::{collections, DocQuery};
use crate::text::prompts;

use super::{priority_for_stage, WorkKind, WorkMetrics, WorkPayload, WorkUnit};

fn metrics(book: &BookState, stage: &str, item_key: String, prompt_key: Option<&str>) -> WorkMetrics {
    let prompt_cid = prompt_key
        .and_then(|key| book.config().prompt(key))
        .and_then(|p| p.cid.clone());
    WorkMetrics {
        book_id: book.id().to_string(),
        stage: stage.to_string(),
        item_key,
        prompt_key: prompt_key.map(String::from),
        prompt_cid,
    }
}

fn unit(
    book: &BookState,
    stage: &str,
    kind: WorkKind,
    item_key: String,
    prompt_key: Option<&str>,
    provider: Option<String>,
    payload: WorkPayload,
) -> WorkUnit {
    WorkUnit {
        id: Uuid::new_v4(),
        kind,
        job_id: book.id().to_string(),
        priority: priority_for_stage(stage),
        provider,
        payload,
        metrics: metrics(book, stage, item_key, prompt_key),
    }
}

fn prompt_text(book: &BookState, key: &str) -> String {
    book.config()
        .prompt(key)
        .map(|p| p.text.clone())
        .unwrap_or_default()
}

/// CPU unit that rasterizes the PDF page containing `page_num`.
/// `None` when the page number is out of range.
pub fn create_extract_work_unit(book: &BookState, page_num: u32) -> Option<WorkUnit> {
    let config = book.config();
    let (pdf, pdf_page_index) = layout::resolve_pdf_page(&config.source_pdfs, page_num)?;
    let output_path = layout::image_path(&config.data_dir, book.id(), page_num);
    Some(unit(
        book,
        "extract",
        WorkKind::Cpu,
        format!("page:{page_num}"),
        None,
        None,
        WorkPayload::ExtractPage {
            page_num,
            pdf_path: pdf.path.clone(),
            pdf_page_index,
            output_path,
        },
    ))
}

/// OCR unit for one (page, provider) pair. Reads the rasterized image
/// from disk; `None` when it is missing (extraction not done yet).
pub fn create_ocr_work_unit(book: &BookState, page_num: u32, provider: &str) -> Option<WorkUnit> {
    let image_path = layout::image_path(&book.config().data_dir, book.id(), page_num);
    let image = match std::fs::read(&image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(page = page_num, "page image not readable yet: {e}");
            return None;
        }
    };
    Some(unit(
        book,
        "ocr",
        WorkKind::Ocr,
        format!("page:{page_num}:{provider}"),
        None,
        Some(provider.to_string()),
        WorkPayload::OcrPage {
            page_num,
            image_path,
            image,
        },
    ))
}

/// LLM unit reconciling per-provider texts into markdown. `None` until
/// every configured provider has completed for the page.
pub fn create_blend_work_unit(book: &BookState, page_num: u32) -> Option<WorkUnit> {
    let page = book.page(page_num)?;
    if !page.all_ocr_done(book.ocr_providers()) {
        return None;
    }
    Some(unit(
        book,
        "blend",
        WorkKind::Llm,
        format!("page:{page_num}"),
        Some("blend"),
        None,
        WorkPayload::BlendPage {
            page_num,
            provider_texts: page.ocr_texts(),
        },
    ))
}

/// LLM unit extracting bibliographic metadata from the earliest pages.
/// Prefers in-memory markdown, falling back to a store query for blended
/// pages ordered by page number.
pub async fn create_metadata_work_unit(book: &BookState) -> Result<Option<WorkUnit>, PersistError> {
    let wanted = METADATA_PAGE_COUNT.min(book.total_pages() as usize);
    let mut texts: Vec<(u32, String)> = Vec::new();
    book.for_each_page(|page| {
        if texts.len() < wanted {
            if let Some(markdown) = page.ocr_markdown() {
                texts.push((page.page_num(), markdown));
            }
        }
    });

    if texts.len() < wanted {
        if let Some(store) = book.store() {
            let results = store
                .execute(
                    DocQuery::collection(collections::PAGE)
                        .filter("book_id", book.id())
                        .filter("blend_complete", true)
                        .order_asc("page_num")
                        .limit(METADATA_PAGE_COUNT),
                )
                .await?;
            let from_db: Vec<(u32, String)> = results
                .iter()
                .filter_map(|doc| {
                    let page_num = doc.u32_field("page_num")?;
                    let markdown = doc.str_field("ocr_markdown")?;
                    Some((page_num, markdown.to_string()))
                })
                .collect();
            if from_db.len() > texts.len() {
                texts = from_db;
            }
        }
    }

    if texts.is_empty() {
        return Ok(None);
    }

    let pages_text = texts
        .iter()
        .map(|(_, markdown)| markdown.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Some(unit(
        book,
        "metadata",
        WorkKind::Llm,
        "book".to_string(),
        Some("metadata"),
        None,
        WorkPayload::Metadata {
            pages_text,
            prompt: prompt_text(book, "metadata"),
        },
    )))
}

/// LLM unit parsing the printed ToC pages. `None` until the finder has
/// recorded a page range. Loads the range through the page cache and
/// primes the prompt with the structure summary when one exists.
pub async fn create_toc_extract_work_unit(
    book: &BookState,
) -> Result<Option<WorkUnit>, PersistError> {
    let Some((start, end)) = book.toc_page_range() else {
        return Ok(None);
    };
    book.preload_pages(start, end).await?;

    let mut pages_text = String::new();
    book.for_each_page(|page| {
        if page.page_num() >= start && page.page_num() <= end {
            if let Some(markdown) = page.ocr_markdown() {
                if !pages_text.is_empty() {
                    pages_text.push_str("\n\n");
                }
                pages_text.push_str(&markdown);
            }
        }
    });
    if pages_text.is_empty() {
        return Ok(None);
    }

    let structure_summary = match book.structure_summary() {
        Some(summary) => Some(summary),
        None => match (book.store(), book.toc_doc_id()) {
            (Some(store), Some(toc_id)) => {
                let results = store
                    .execute(DocQuery::collection(collections::TOC).filter("_id", toc_id))
                    .await?;
                results
                    .first()
                    .and_then(|doc| doc.str_field("structure_summary"))
                    .map(String::from)
            }
            _ => None,
        },
    };

    Ok(Some(unit(
        book,
        "toc_extract",
        WorkKind::Llm,
        "toc".to_string(),
        Some("toc_extract"),
        None,
        WorkPayload::TocExtract {
            pages_text,
            prompt: prompt_text(book, "toc_extract"),
            structure_summary,
        },
    )))
}

/// LLM unit extracting printed label data for one page, primed with the
/// pattern context derived from pattern analysis. `None` until the page
/// has reconciled markdown.
pub fn create_label_work_unit(book: &BookState, page_num: u32) -> Option<WorkUnit> {
    let page = book.page(page_num)?;
    let markdown = page.ocr_markdown()?;
    let context = book
        .pattern_result()
        .map(|pattern| pattern.context_for(page_num))
        .unwrap_or_else(|| crate::models::PatternContext {
            page_num,
            ..Default::default()
        });
    Some(unit(
        book,
        "label",
        WorkKind::Llm,
        format!("page:{page_num}"),
        Some("label"),
        None,
        WorkPayload::Label {
            page_num,
            markdown,
            context,
        },
    ))
}

/// LLM unit classifying the whole chapter skeleton. `None` until
/// chapters exist.
pub fn create_classify_work_unit(book: &BookState) -> Option<WorkUnit> {
    let chapters = book.structure_chapters();
    if chapters.is_empty() {
        return None;
    }
    let title = book.metadata().title.unwrap_or_else(|| book.id().to_string());
    let prompt = prompts::build_classify_prompt(&title, &chapters);
    Some(unit(
        book,
        "classify",
        WorkKind::Llm,
        "chapters".to_string(),
        Some("classify"),
        None,
        WorkPayload::Classify { prompt },
    ))
}

/// LLM unit polishing one chapter. `None` until the chapter's mechanical
/// text has been extracted.
pub fn create_polish_work_unit(book: &BookState, chapter: &Chapter) -> Option<WorkUnit> {
    let mechanical = chapter.mechanical_text.as_deref()?;
    let chapter_key = chapter.unique_key(book.id());
    let prompt = prompts::build_polish_prompt(&chapter.title, mechanical);
    Some(unit(
        book,
        "polish",
        WorkKind::Llm,
        format!("chapter:{chapter_key}"),
        Some("polish"),
        None,
        WorkPayload::Polish {
            chapter_key,
            prompt,
        },
    ))
}
