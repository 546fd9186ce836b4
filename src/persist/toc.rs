//! Persisters for ToC entries: upserts, page links, resorting, and the
//! destructive clears used by the reset path.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::models::TocEntry;
use crate::state::BookState;
use crate::store::{collections, DocQuery, StoreOp};

use super::{aggregate_results, require_store, PersistError, Result};

/// Upper bound on concurrent entry upserts.
const ENTRY_UPSERT_CONCURRENCY: usize = 5;

fn entry_create_doc(entry: &TocEntry) -> Value {
    json!({
        "toc_id": entry.toc_id,
        "unique_key": entry.unique_key(),
        "sort_order": entry.sort_order,
        "title": entry.title,
        "level": entry.level,
        "level_name": entry.level_name,
        "entry_number": entry.entry_number,
        "printed_page_number": entry.printed_page,
        "actual_page_id": entry.actual_page_id,
        "actual_page_num": entry.actual_page_num,
        "source": entry.source.as_str(),
    })
}

fn entry_update_doc(entry: &TocEntry) -> Value {
    json!({
        "sort_order": entry.sort_order,
        "title": entry.title,
        "level": entry.level,
        "level_name": entry.level_name,
        "entry_number": entry.entry_number,
        "printed_page_number": entry.printed_page,
        "source": entry.source.as_str(),
    })
}

impl BookState {
    /// Upsert the extracted entries by `unique_key`, at most
    /// [`ENTRY_UPSERT_CONCURRENCY`] writes in flight. All-or-nothing in
    /// memory: if any upsert errored, the aggregated error is returned
    /// and no entry doc id is recorded.
    pub async fn persist_toc_entries(
        &self,
        toc_doc_id: &str,
        mut entries: Vec<TocEntry>,
    ) -> Result<Vec<TocEntry>> {
        let store = require_store(self)?;
        for entry in &mut entries {
            entry.toc_id = toc_doc_id.to_string();
        }

        let results: Vec<_> = stream::iter(entries.iter().map(|entry| {
            let store = store.clone();
            let filters = vec![("unique_key".to_string(), json!(entry.unique_key()))];
            let create = entry_create_doc(entry);
            let update = entry_update_doc(entry);
            async move {
                store
                    .upsert_with_version(collections::TOC_ENTRY, filters, create, update)
                    .await
            }
        }))
        .buffered(ENTRY_UPSERT_CONCURRENCY)
        .collect()
        .await;

        aggregate_results(&results, "toc_entry")?;

        for (entry, result) in entries.iter_mut().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            entry.doc_id = Some(ack.doc_id.clone());
            self.track_write(collections::TOC_ENTRY, &ack.doc_id, &ack.cid);
        }
        self.set_toc_entries(entries.clone());
        Ok(entries)
    }

    /// Link one entry to a physical page. DB first; on success the cached
    /// entry is updated in place.
    pub async fn persist_toc_entry_link(
        &self,
        entry_doc_id: &str,
        page_doc_id: &str,
        page_num: u32,
    ) -> Result<()> {
        if entry_doc_id.is_empty() || page_doc_id.is_empty() {
            return Err(PersistError::Validation(
                "entry and page document ids are required for a link".to_string(),
            ));
        }
        let store = require_store(self)?;
        let ack = store
            .update_with_version(
                collections::TOC_ENTRY,
                entry_doc_id,
                json!({
                    "actual_page_id": page_doc_id,
                    "actual_page_num": page_num,
                }),
            )
            .await?;
        self.apply_entry_link(entry_doc_id, page_doc_id, page_num);
        self.track_write(collections::TOC_ENTRY, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Repack sort orders by linked page: entries sort ascending by
    /// `actual_page_num`, entries without a page go last in their current
    /// relative order. Only entries whose sort order changed are written;
    /// memory commits the new orders after the batch succeeds. Returns
    /// how many entries moved.
    pub async fn persist_entry_resort(&self, toc_doc_id: &str) -> Result<usize> {
        let store = require_store(self)?;
        let mut entries = self.linked_entries();
        entries.sort_by_key(|entry| {
            (
                entry.actual_page_num.is_none(),
                entry.actual_page_num.unwrap_or(u32::MAX),
                entry.sort_order,
            )
        });

        let mut changed: Vec<(String, i64)> = Vec::new();
        let mut ops = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let new_order = index as i64;
            if entry.sort_order == new_order {
                continue;
            }
            let doc_id = entry.doc_id.clone().ok_or_else(|| {
                PersistError::Validation(format!(
                    "entry {:?} has no document id to resort",
                    entry.title
                ))
            })?;
            ops.push(StoreOp::update(
                collections::TOC_ENTRY,
                doc_id.clone(),
                json!({
                    "sort_order": new_order,
                    "unique_key": format!("{toc_doc_id}:{new_order}"),
                }),
            ));
            changed.push((doc_id, new_order));
        }
        if changed.is_empty() {
            return Ok(0);
        }

        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "entry_resort")?;

        for result in &results {
            let ack = result.as_ref().expect("aggregated above");
            self.track_write(collections::TOC_ENTRY, &ack.doc_id, &ack.cid);
        }
        self.apply_sort_orders(&changed);
        Ok(changed.len())
    }

    /// Delete every entry under a ToC document, clearing the cached entry
    /// lists only when every delete succeeded. Returns the deleted count.
    pub async fn delete_all_toc_entries(&self, toc_doc_id: &str) -> Result<usize> {
        let store = require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::TOC_ENTRY).filter("toc_id", toc_doc_id))
            .await?;
        if !docs.is_empty() {
            let ops = docs
                .iter()
                .map(|doc| StoreOp::delete(collections::TOC_ENTRY, doc.doc_id.clone()))
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "toc_entry_delete")?;
        }
        self.clear_toc_entries();
        self.clear_linked_entries();
        Ok(docs.len())
    }

    /// Unlink every entry under a ToC document. Memory is cleared only
    /// after every unlink write succeeded.
    pub async fn clear_all_toc_entry_links(&self, toc_doc_id: &str) -> Result<usize> {
        let store = require_store(self)?;
        let docs = store
            .execute(DocQuery::collection(collections::TOC_ENTRY).filter("toc_id", toc_doc_id))
            .await?;
        let linked: Vec<_> = docs
            .iter()
            .filter(|doc| doc.str_field("actual_page_id").is_some())
            .collect();
        if !linked.is_empty() {
            let ops = linked
                .iter()
                .map(|doc| {
                    StoreOp::update(
                        collections::TOC_ENTRY,
                        doc.doc_id.clone(),
                        json!({
                            "actual_page_id": Value::Null,
                            "actual_page_num": Value::Null,
                        }),
                    )
                })
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "entry_unlink")?;
        }
        self.clear_entry_links_in_memory();
        Ok(linked.len())
    }
}
