//! End-to-end scenarios for the pipeline state engine, driven entirely
//! through the persisters against the in-memory store.

use std::sync::Arc;

use serde_json::json;

use bindery::models::{BookStatus, Chapter, TocEntry};
use bindery::persist::{load_book, PersistError};
use bindery::state::{BookConfig, BookState, OpKind};
use bindery::store::{collections, MemoryStore, StateStore, StoreOp};

fn config(total_pages: u32, providers: &[&str]) -> BookConfig {
    BookConfig {
        total_pages,
        ocr_providers: providers.iter().map(|s| s.to_string()).collect(),
        max_retries: 3,
        ..Default::default()
    }
}

async fn new_book(total_pages: u32, providers: &[&str]) -> (BookState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ack = store
        .send_sync(StoreOp::create(
            collections::BOOK,
            json!({ "status": "pending", "total_pages": total_pages }),
        ))
        .await
        .unwrap();
    let book = BookState::with_store(ack.doc_id, config(total_pages, providers), store.clone());
    (book, store)
}

// Scenario: happy OCR path over two providers.
#[tokio::test]
async fn happy_ocr_path() {
    let (book, store) = new_book(3, &["P1", "P2"]).await;
    book.create_missing_pages().await.unwrap();

    let first = book
        .persist_ocr_result(1, "P1", "a", "h", "f")
        .await
        .unwrap();
    assert!(!first);

    let second = book
        .persist_ocr_result(1, "P2", "b", "h", "f")
        .await
        .unwrap();
    assert!(second);

    let page = book.page(1).unwrap();
    assert!(page.all_ocr_done(&["P1".to_string(), "P2".to_string()]));

    let doc = store
        .get_doc(collections::PAGE, &page.doc_id().unwrap())
        .unwrap();
    assert_eq!(doc.get("ocr_complete"), Some(&json!(true)));
    assert_eq!(doc.get("header"), Some(&json!("h")));
}

// Scenario: resetting toc_extract leaves toc_finder complete, rewinds
// everything downstream, and deletes every entry under the ToC doc.
#[tokio::test]
async fn toc_reset_cascade() {
    let (book, store) = new_book(10, &["P1"]).await;
    let toc_id = book.ensure_toc_doc().await.unwrap();

    book.persist_toc_entries(
        &toc_id,
        vec![
            TocEntry::new(&toc_id, 0, "One"),
            TocEntry::new(&toc_id, 1, "Two"),
            TocEntry::new(&toc_id, 2, "Three"),
        ],
    )
    .await
    .unwrap();

    for op in [OpKind::TocFinder, OpKind::TocExtract, OpKind::TocLink] {
        book.op_start(op).unwrap();
        book.persist_op_complete(op).await.unwrap();
    }

    book.reset_from(OpKind::TocExtract).await.unwrap();

    assert_eq!(store.count(collections::TOC_ENTRY), 0);
    assert!(book.op_is_complete(OpKind::TocFinder));
    for op in [
        OpKind::TocExtract,
        OpKind::TocLink,
        OpKind::TocFinalize,
        OpKind::Structure,
    ] {
        assert!(book.op_can_start(op));
    }
    assert!(book.toc_entries().is_none());
}

// Scenario: starting an operation twice fails with "operation already".
#[tokio::test]
async fn operation_double_start() {
    let (book, _store) = new_book(1, &["P1"]).await;
    assert!(book.op_start(OpKind::Metadata).is_ok());
    let err = book.op_start(OpKind::Metadata).unwrap_err();
    assert!(err.to_string().contains("operation already"));
}

// Scenario: failure then retry until the retry cap.
#[tokio::test]
async fn failure_then_retry_until_exhausted() {
    let (book, _store) = new_book(1, &["P1"]).await;
    let op = OpKind::TocFinder;

    book.op_start(op).unwrap();
    assert!(!book.op_fail(op));
    assert_eq!(book.op_retries(op), 1);
    assert!(!book.op_is_failed(op));

    book.op_start(op).unwrap();
    assert!(!book.op_fail(op));
    assert_eq!(book.op_retries(op), 2);

    book.op_start(op).unwrap();
    assert!(book.op_fail(op));
    assert!(book.op_is_failed(op));
    assert!(book.op_is_done(op));
}

// Scenario: batch page creation is idempotent.
#[tokio::test]
async fn batch_page_creation() {
    let (book, store) = new_book(5, &["P1"]).await;
    assert_eq!(book.count_pages(), 0);

    let created = book.create_missing_pages().await.unwrap();
    assert_eq!(created, 5);
    assert_eq!(store.count(collections::PAGE), 5);
    for num in 1..=5 {
        let page = book.page(num).expect("page registered in memory");
        assert!(page.doc_id().is_some());
        assert!(page.cid().is_some());
    }

    assert_eq!(book.create_missing_pages().await.unwrap(), 0);
    assert_eq!(store.count(collections::PAGE), 5);
}

// Scenario: sort-order repack over a mix of linked and unlinked entries.
#[tokio::test]
async fn sort_order_repack() {
    let (book, store) = new_book(20, &["P1"]).await;
    let toc_id = book.ensure_toc_doc().await.unwrap();

    let mut entries = vec![
        TocEntry::new(&toc_id, 0, "at page five"),
        TocEntry::new(&toc_id, 1, "unlinked"),
        TocEntry::new(&toc_id, 2, "at page three"),
        TocEntry::new(&toc_id, 3, "at page nine"),
    ];
    entries[0].actual_page_id = Some("p5".into());
    entries[0].actual_page_num = Some(5);
    entries[2].actual_page_id = Some("p3".into());
    entries[2].actual_page_num = Some(3);
    entries[3].actual_page_id = Some("p9".into());
    entries[3].actual_page_num = Some(9);

    let persisted = book.persist_toc_entries(&toc_id, entries).await.unwrap();
    book.set_linked_entries(persisted.clone());

    book.persist_entry_resort(&toc_id).await.unwrap();

    let by_title = |title: &str| {
        book.linked_entries()
            .into_iter()
            .find(|e| e.title == title)
            .unwrap()
            .sort_order
    };
    assert_eq!(by_title("at page three"), 0);
    assert_eq!(by_title("at page five"), 1);
    assert_eq!(by_title("at page nine"), 2);
    assert_eq!(by_title("unlinked"), 3);

    // the store agrees
    let doc = store
        .get_doc(
            collections::TOC_ENTRY,
            persisted[2].doc_id.as_ref().unwrap(),
        )
        .unwrap();
    assert_eq!(doc.get("sort_order"), Some(&json!(0)));
}

// All-or-nothing persistence: a failure mid-batch must leave every
// in-memory chapter without a doc id.
#[tokio::test]
async fn chapter_skeleton_all_or_nothing() {
    let (book, store) = new_book(10, &["P1"]).await;
    store.fail_nth_write(collections::CHAPTER, 2);

    let mut chapters = Vec::new();
    for (idx, title) in ["One", "Two", "Three"].iter().enumerate() {
        let mut chapter = Chapter::new(*title, 1, 5);
        chapter.entry_id = Some(format!("e{idx}"));
        chapters.push(chapter);
    }

    let err = book.persist_chapter_skeleton(chapters).await.unwrap_err();
    assert!(matches!(err, PersistError::PartialBatch { failed: 1, total: 3, .. }));
    assert!(book.structure_chapters().is_empty());
}

// Crash-resume: a fresh process sees exactly the persisted state.
#[tokio::test]
async fn reload_resumes_where_left_off() {
    let (book, store) = new_book(3, &["P1"]).await;
    let book_id = book.id().to_string();

    book.create_missing_pages().await.unwrap();
    book.persist_book_status(BookStatus::Processing).await.unwrap();
    book.persist_ocr_result(1, "P1", "text one", "", "").await.unwrap();
    book.persist_ocr_result(2, "P1", "text two", "", "").await.unwrap();
    book.op_start(OpKind::Metadata).unwrap();
    book.persist_op_state(OpKind::Metadata).await.unwrap();
    drop(book);

    let dyn_store: Arc<dyn StateStore> = store;
    let resumed = load_book(dyn_store, &book_id, config(3, &["P1"]))
        .await
        .unwrap();

    assert_eq!(resumed.status(), BookStatus::Processing);
    assert!(resumed.op_is_started(OpKind::Metadata));
    assert_eq!(resumed.count_ocr_pages(), 2);
    assert!(resumed.consecutive_pages_complete(2));
    assert!(!resumed.consecutive_pages_complete(3));
    assert!(!resumed.all_pages_ocr_complete());

    // the interrupted page picks up where it left off
    let done = resumed
        .persist_ocr_result(3, "P1", "text three", "", "")
        .await
        .unwrap();
    assert!(done);
    assert!(resumed.all_pages_ocr_complete());
}

// Accessor isolation across the collection-valued accessors.
#[tokio::test]
async fn accessors_return_copies() {
    let (book, _store) = new_book(3, &["P1"]).await;
    let toc_id = book.ensure_toc_doc().await.unwrap();
    book.persist_toc_entries(&toc_id, vec![TocEntry::new(&toc_id, 0, "One")])
        .await
        .unwrap();

    let mut entries = book.toc_entries().unwrap();
    entries[0].title = "mutated".into();
    assert_eq!(book.toc_entries().unwrap()[0].title, "One");

    let mut chapter = Chapter::new("Ch", 1, 2);
    chapter.entry_id = Some("e1".into());
    book.persist_chapter_skeleton(vec![chapter]).await.unwrap();
    let mut chapters = book.structure_chapters();
    chapters[0].title = "mutated".into();
    assert_eq!(book.structure_chapters()[0].title, "Ch");

    book.add_cost("ocr", 1.0);
    let mut costs = book.costs_by_stage();
    costs.insert("ocr".into(), 99.0);
    assert!((book.costs_by_stage()["ocr"] - 1.0).abs() < f64::EPSILON);
}
