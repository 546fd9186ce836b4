//! Persisters for agent conversation checkpoints and run summaries.

use serde_json::json;
use tracing::debug;

use crate::models::{AgentKind, AgentRunSummary, AgentState};
use crate::state::BookState;
use crate::store::{collections, DocQuery, StoreOp};

use super::{aggregate_results, require_store, PersistError, Result};

fn agent_create_doc(book_id: &str, state: &AgentState) -> serde_json::Value {
    json!({
        "book_id": book_id,
        "agent_id": state.agent_id,
        "agent_type": state.kind.as_str(),
        "entry_doc_id": state.entry_doc_id,
        "iteration": state.iteration,
        "complete": state.complete,
        "messages_json": state.messages_json,
        "pending_tool_calls": state.pending_tool_calls,
        "tool_results": state.tool_results,
        "result_json": state.result_json,
    })
}

fn agent_update_doc(state: &AgentState) -> serde_json::Value {
    json!({
        "iteration": state.iteration,
        "complete": state.complete,
        "messages_json": state.messages_json,
        "pending_tool_calls": state.pending_tool_calls,
        "tool_results": state.tool_results,
        "result_json": state.result_json,
    })
}

impl BookState {
    /// Create the store row for a fresh agent conversation, stamping the
    /// assigned doc id and cid onto the supplied state and registering it
    /// in the in-memory checkpoint map.
    pub async fn persist_new_agent_state(&self, state: &mut AgentState) -> Result<()> {
        if state.agent_id.is_empty() {
            return Err(PersistError::Validation(
                "agent_id must not be empty".to_string(),
            ));
        }
        let store = require_store(self)?;
        let ack = store
            .send_sync(StoreOp::create(
                collections::AGENT_STATE,
                agent_create_doc(self.id(), state),
            ))
            .await?;
        state.doc_id = Some(ack.doc_id.clone());
        state.cid = Some(ack.cid.clone());
        self.set_agent_state(state.clone());
        self.track_write(collections::AGENT_STATE, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Batch variant of [`BookState::persist_new_agent_state`].
    /// All-or-nothing: on any failure no state receives a doc id.
    pub async fn persist_new_agent_states(&self, states: &mut [AgentState]) -> Result<()> {
        if states.is_empty() {
            return Ok(());
        }
        if let Some(bad) = states.iter().find(|s| s.agent_id.is_empty()) {
            return Err(PersistError::Validation(format!(
                "agent_id must not be empty ({})",
                bad.kind.as_str()
            )));
        }
        let store = require_store(self)?;
        let ops = states
            .iter()
            .map(|state| StoreOp::create(collections::AGENT_STATE, agent_create_doc(self.id(), state)))
            .collect();
        let results = store.send_many_sync(ops).await;
        aggregate_results(&results, "agent_state_create")?;

        for (state, result) in states.iter_mut().zip(&results) {
            let ack = result.as_ref().expect("aggregated above");
            state.doc_id = Some(ack.doc_id.clone());
            state.cid = Some(ack.cid.clone());
            self.set_agent_state(state.clone());
            self.track_write(collections::AGENT_STATE, &ack.doc_id, &ack.cid);
        }
        Ok(())
    }

    /// Sync checkpoint of an in-flight conversation.
    pub async fn persist_agent_checkpoint(&self, state: &AgentState) -> Result<()> {
        let store = require_store(self)?;
        let doc_id = state.doc_id.clone().ok_or_else(|| {
            PersistError::Validation(format!(
                "agent {} has no document yet; create it first",
                state.state_key()
            ))
        })?;
        let ack = store
            .update_with_version(collections::AGENT_STATE, &doc_id, agent_update_doc(state))
            .await?;
        let mut updated = state.clone();
        updated.cid = Some(ack.cid.clone());
        self.set_agent_state(updated);
        self.track_write(collections::AGENT_STATE, &ack.doc_id, &ack.cid);
        Ok(())
    }

    /// Async checkpoint: memory first, fire-and-forget, no cid tracking.
    /// A state without a doc id is cached in memory only.
    pub fn persist_agent_checkpoint_async(&self, state: AgentState) -> Result<()> {
        let store = require_store(self)?;
        let doc_id = state.doc_id.clone();
        let fields = agent_update_doc(&state);
        self.set_agent_state(state);
        match doc_id {
            Some(doc_id) => {
                store.send(StoreOp::update(collections::AGENT_STATE, doc_id, fields))
            }
            None => debug!("agent checkpoint has no document yet, cached in memory only"),
        }
        Ok(())
    }

    /// Delete every persisted checkpoint of one agent kind for this book,
    /// then drop the matching in-memory entries. Returns the deleted
    /// count.
    pub async fn delete_agent_states_for_kind(&self, kind: AgentKind) -> Result<usize> {
        let store = require_store(self)?;
        let docs = store
            .execute(
                DocQuery::collection(collections::AGENT_STATE)
                    .filter("book_id", self.id())
                    .filter("agent_type", kind.as_str()),
            )
            .await?;
        if !docs.is_empty() {
            let ops = docs
                .iter()
                .map(|doc| StoreOp::delete(collections::AGENT_STATE, doc.doc_id.clone()))
                .collect();
            let results = store.send_many_sync(ops).await;
            aggregate_results(&results, "agent_state_delete")?;
        }
        self.clear_agent_states(kind);
        Ok(docs.len())
    }

    /// Append a finished run summary, writing the store row and the cache.
    pub async fn persist_agent_run(&self, run: AgentRunSummary) -> Result<()> {
        let store = require_store(self)?;
        let ack = store
            .send_sync(StoreOp::create(
                collections::AGENT_RUN,
                json!({
                    "book_id": self.id(),
                    "agent_type": run.kind.as_str(),
                    "item_key": run.item_key,
                    "iterations": run.iterations,
                    "cost": run.cost,
                    "outcome": run.outcome,
                }),
            ))
            .await?;
        self.add_agent_run(run);
        self.track_write(collections::AGENT_RUN, &ack.doc_id, &ack.cid);
        Ok(())
    }
}
