//! Persisters for chapter skeletons and the extract/classify/polish
//! phases.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::models::{Chapter, ContentType, MatterType};
use crate::state::BookState;
use crate::store::{collections, DocQuery, StoreOp};

use super::{aggregate_results, require_store, PersistError, Result};

const CHAPTER_UPSERT_CONCURRENCY: usize = 5;

/// Classification verdict for one chapter.
#[derive(Debug, Clone)]
pub struct ChapterClassification {
    pub doc_id: String,
    pub matter: MatterType,
    pub content_type: ContentType,
    pub audio_include: bool,
    pub reasoning: Option<String>,
}

/// Polish outcome for one chapter. `polished_text = None` records a
/// failed polish.
#[derive(Debug, Clone)]
pub struct ChapterPolish {
    pub doc_id: String,
    pub polished_text: Option<String>,
}

fn skeleton_doc(book_id: &str, chapter: &Chapter) -> Value {
    json!({
        "book_id": book_id,
        "unique_key": chapter.unique_key(book_id),
        "entry_id": chapter.entry_id,
        "title": chapter.title,
        "level": chapter.level,
        "start_page": chapter.start_page,
        "end_page": chapter.end_page,
        "sort_order": chapter.sort_order,
        "extract_done": false,
        "polish_done": false,
        "polish_failed": false,
    })
}

impl BookState {
    /// Upsert the chapter skeleton by `unique_key`. All-or-nothing in
    /// memory: on any failure no chapter receives a doc id and the cached
    /// chapter list is untouched.
    pub async fn persist_chapter_skeleton(
        &self,
        mut chapters: Vec<Chapter>,
    ) -> Result<Vec<Chapter>> {
        let store = require_store(self)?;
        let book_id = self.id().to_string();

        let results: Vec<_> = stream::iter(chapters.iter().map(|chapter| {
            let store = store.clone();
            let key = chapter.unique_key(&book_id);
            let create = skeleton_doc(&book_id, chapter);
            let update = json!({
                "title": chapter.title,
                "level": chapter.level,
                "start_page": chapter.start_page,
                "end_page": chapter.end_page,
                "sort_order": chapter.sort_order,
            });
            async move {
                store
                    .upsert_with_version(
                        collections::CHAPTER,
                        vec![("unique_key".to_string(), json!(key))],
                        create,
                        update,
                    )
                    .await
            }
        }))
        .buffered(CHAPTER_UPSERT_CONCURRENCY)
        .collect()
        .await;

        aggregate_results(&results, "chapter_skeleton")?;

        for (chapter, result) in chapters.iter_mut().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            chapter.doc_id = Some(ack.doc_id.clone());
            self.track_write(collections::CHAPTER, &ack.doc_id, &ack.cid);
        }
        self.set_structure_chapters(chapters.clone());
        Ok(chapters)
    }

    /// Write the mechanical text of extracted chapters. Only chapters
    /// carrying `mechanical_text` are written; all-or-nothing in memory.
    pub async fn persist_chapter_extracts(&self, chapters: &[Chapter]) -> Result<usize> {
        let store = require_store(self)?;
        let mut ops = Vec::new();
        let mut updated = Vec::new();
        for chapter in chapters {
            let Some(text) = chapter.mechanical_text.as_deref() else {
                continue;
            };
            let doc_id = chapter.doc_id.clone().ok_or_else(|| {
                PersistError::Validation(format!(
                    "chapter {:?} has no document id; persist the skeleton first",
                    chapter.title
                ))
            })?;
            ops.push(StoreOp::update(
                collections::CHAPTER,
                doc_id,
                json!({
                    "mechanical_text": text,
                    "word_count": chapter.word_count,
                    "extract_done": true,
                }),
            ));
            let mut done = chapter.clone();
            done.extract_done = true;
            updated.push(done);
        }
        if ops.is_empty() {
            return Ok(0);
        }

        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "chapter_extract")?;

        for (chapter, result) in updated.iter().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            self.update_chapter(chapter.clone())?;
            self.increment_chapters_extracted();
            self.track_write(collections::CHAPTER, &ack.doc_id, &ack.cid);
        }
        Ok(updated.len())
    }

    /// Write classification verdicts. All-or-nothing in memory; the
    /// reasonings are cached for audit output after the batch succeeds.
    pub async fn persist_chapter_classifications(
        &self,
        classifications: Vec<ChapterClassification>,
    ) -> Result<usize> {
        if classifications.is_empty() {
            return Ok(0);
        }
        let store = require_store(self)?;
        let ops = classifications
            .iter()
            .map(|c| {
                StoreOp::update(
                    collections::CHAPTER,
                    c.doc_id.clone(),
                    json!({
                        "matter_type": c.matter.as_str(),
                        "content_type": c.content_type.as_str(),
                        "audio_include": c.audio_include,
                    }),
                )
            })
            .collect();

        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "chapter_classify")?;

        let chapters = self.structure_chapters();
        for (classification, result) in classifications.iter().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            if let Some(mut chapter) = chapters
                .iter()
                .find(|ch| ch.doc_id.as_deref() == Some(classification.doc_id.as_str()))
                .cloned()
            {
                chapter.matter = Some(classification.matter);
                chapter.content_type = Some(classification.content_type);
                chapter.audio_include = Some(classification.audio_include);
                self.update_chapter(chapter)?;
            }
            if let Some(reasoning) = &classification.reasoning {
                self.add_classify_reasoning(reasoning.clone());
            }
            self.increment_chapters_classified();
            self.track_write(collections::CHAPTER, &ack.doc_id, &ack.cid);
        }
        Ok(classifications.len())
    }

    /// Write polish outcomes. A result without text records a failed
    /// polish. All-or-nothing in memory.
    pub async fn persist_chapter_polish(&self, outcomes: Vec<ChapterPolish>) -> Result<usize> {
        if outcomes.is_empty() {
            return Ok(0);
        }
        let store = require_store(self)?;
        let ops = outcomes
            .iter()
            .map(|outcome| {
                let fields = match &outcome.polished_text {
                    Some(text) => json!({
                        "polished_text": text,
                        "polish_done": true,
                        "polish_failed": false,
                    }),
                    None => json!({ "polish_failed": true }),
                };
                StoreOp::update(collections::CHAPTER, outcome.doc_id.clone(), fields)
            })
            .collect();

        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "chapter_polish")?;

        let chapters = self.structure_chapters();
        for (outcome, result) in outcomes.iter().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            if let Some(mut chapter) = chapters
                .iter()
                .find(|ch| ch.doc_id.as_deref() == Some(outcome.doc_id.as_str()))
                .cloned()
            {
                match &outcome.polished_text {
                    Some(text) => {
                        chapter.polished_text = Some(text.clone());
                        chapter.polish_done = true;
                        chapter.polish_failed = false;
                        self.increment_chapters_polished();
                    }
                    None => {
                        chapter.polish_failed = true;
                        self.increment_polish_failures();
                    }
                }
                self.update_chapter(chapter)?;
            }
            self.track_write(collections::CHAPTER, &ack.doc_id, &ack.cid);
        }
        Ok(outcomes.len())
    }

    /// Delete every chapter row for this book, clearing the cached list
    /// only when every delete succeeded. Returns the deleted count.
    pub async fn delete_all_chapters(&self) -> Result<usize> {
        let store = require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::CHAPTER).filter("book_id", self.id()))
            .await?;
        if !docs.is_empty() {
            let ops = docs
                .iter()
                .map(|doc| StoreOp::delete(collections::CHAPTER, doc.doc_id.clone()))
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "chapter_delete")?;
        }
        self.clear_structure_chapters();
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BookConfig;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn book_with_store() -> (BookState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let book = BookState::with_store("book1", BookConfig::default(), store.clone());
        (book, store)
    }

    fn skeleton(title: &str, entry: Option<&str>, sort_order: i64) -> Chapter {
        let mut chapter = Chapter::new(title, 1, 10);
        chapter.entry_id = entry.map(String::from);
        chapter.sort_order = sort_order;
        chapter
    }

    #[tokio::test]
    async fn skeleton_failure_leaves_doc_ids_empty() {
        let (book, store) = book_with_store();
        store.fail_nth_write(collections::CHAPTER, 2);
        let err = book
            .persist_chapter_skeleton(vec![
                skeleton("One", Some("e1"), 0),
                skeleton("Two", Some("e2"), 1),
                skeleton("Three", Some("e3"), 2),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::PartialBatch { failed: 1, .. }));
        assert!(book.structure_chapters().is_empty());
    }

    #[tokio::test]
    async fn skeleton_then_extract_round_trip() {
        let (book, store) = book_with_store();
        let mut chapters = book
            .persist_chapter_skeleton(vec![skeleton("One", Some("e1"), 0)])
            .await
            .unwrap();

        chapters[0].mechanical_text = Some("the text".into());
        chapters[0].word_count = 2;
        let written = book.persist_chapter_extracts(&chapters).await.unwrap();
        assert_eq!(written, 1);

        let cached = book.structure_chapters();
        assert!(cached[0].extract_done);
        let doc = store
            .get_doc(collections::CHAPTER, cached[0].doc_id.as_ref().unwrap())
            .unwrap();
        assert_eq!(doc.get("extract_done"), Some(&json!(true)));
        assert_eq!(book.structure_counters().0, 1);
    }

    #[tokio::test]
    async fn classification_updates_memory_and_reasonings() {
        let (book, _store) = book_with_store();
        let chapters = book
            .persist_chapter_skeleton(vec![skeleton("Preface", Some("e1"), 0)])
            .await
            .unwrap();

        book.persist_chapter_classifications(vec![ChapterClassification {
            doc_id: chapters[0].doc_id.clone().unwrap(),
            matter: MatterType::Front,
            content_type: ContentType::Preface,
            audio_include: false,
            reasoning: Some("titled preface, before body".into()),
        }])
        .await
        .unwrap();

        let cached = book.structure_chapters();
        assert_eq!(cached[0].matter, Some(MatterType::Front));
        assert_eq!(cached[0].audio_include, Some(false));
        assert_eq!(book.classify_reasonings().len(), 1);
    }

    #[tokio::test]
    async fn polish_failure_flag_round_trip() {
        let (book, store) = book_with_store();
        let chapters = book
            .persist_chapter_skeleton(vec![
                skeleton("One", Some("e1"), 0),
                skeleton("Two", Some("e2"), 1),
            ])
            .await
            .unwrap();

        book.persist_chapter_polish(vec![
            ChapterPolish {
                doc_id: chapters[0].doc_id.clone().unwrap(),
                polished_text: Some("clean".into()),
            },
            ChapterPolish {
                doc_id: chapters[1].doc_id.clone().unwrap(),
                polished_text: None,
            },
        ])
        .await
        .unwrap();

        let cached = book.structure_chapters();
        assert!(cached[0].polish_done);
        assert!(cached[1].polish_failed);
        let doc = store
            .get_doc(collections::CHAPTER, cached[1].doc_id.as_ref().unwrap())
            .unwrap();
        assert_eq!(doc.get("polish_failed"), Some(&json!(true)));
        let (_, _, polished, failures) = book.structure_counters();
        assert_eq!((polished, failures), (1, 1));
    }

    #[tokio::test]
    async fn delete_all_clears_store_and_memory() {
        let (book, store) = book_with_store();
        book.persist_chapter_skeleton(vec![
            skeleton("One", Some("e1"), 0),
            skeleton("Two", None, 1),
        ])
        .await
        .unwrap();

        let deleted = book.delete_all_chapters().await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count(collections::CHAPTER), 0);
        assert!(book.structure_chapters().is_empty());
        // idempotent
        assert_eq!(book.delete_all_chapters().await.unwrap(), 0);
    }
}
