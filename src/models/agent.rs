//! Checkpoint models for the tool-using agents driven by the pipeline.

use serde::{Deserialize, Serialize};

/// The fixed set of agent roles whose conversations are checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    TocFinder,
    TocEntryFinder,
    ChapterFinder,
    GapInvestigator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TocFinder => "toc_finder",
            Self::TocEntryFinder => "toc_entry_finder",
            Self::ChapterFinder => "chapter_finder",
            Self::GapInvestigator => "gap_investigator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "toc_finder" => Some(Self::TocFinder),
            "toc_entry_finder" => Some(Self::TocEntryFinder),
            "chapter_finder" => Some(Self::ChapterFinder),
            "gap_investigator" => Some(Self::GapInvestigator),
            _ => None,
        }
    }
}

/// A resumable snapshot of one agent conversation.
///
/// The conversation history and tool traffic are opaque serialized blobs;
/// the state engine only stores and restores them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Store document id, `None` until persisted.
    pub doc_id: Option<String>,
    /// Latest store commit id.
    pub cid: Option<String>,
    pub kind: AgentKind,
    /// Instance id, unique per conversation.
    pub agent_id: String,
    /// For per-entry agents, the ToC entry document this run targets.
    pub entry_doc_id: Option<String>,
    pub iteration: u32,
    pub complete: bool,
    /// Serialized conversation history.
    pub messages_json: String,
    pub pending_tool_calls: Option<String>,
    pub tool_results: Option<String>,
    /// Final structured result, once the agent finished.
    pub result_json: Option<String>,
}

impl AgentState {
    pub fn new(kind: AgentKind, agent_id: impl Into<String>) -> Self {
        Self {
            doc_id: None,
            cid: None,
            kind,
            agent_id: agent_id.into(),
            entry_doc_id: None,
            iteration: 0,
            complete: false,
            messages_json: String::new(),
            pending_tool_calls: None,
            tool_results: None,
            result_json: None,
        }
    }

    /// In-memory registry key: the kind alone, or `kind:entry` for
    /// per-entry agents.
    pub fn state_key(&self) -> String {
        match &self.entry_doc_id {
            Some(entry) => format!("{}:{}", self.kind.as_str(), entry),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// Append-only summary of one finished agent run, kept for audit output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunSummary {
    pub kind: AgentKind,
    /// What the run operated on (entry key, page range, ...).
    pub item_key: String,
    pub iterations: u32,
    pub cost: f64,
    /// "complete", "exhausted", "failed", ...
    pub outcome: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_includes_entry_when_present() {
        let mut state = AgentState::new(AgentKind::TocEntryFinder, "agent-1");
        assert_eq!(state.state_key(), "toc_entry_finder");
        state.entry_doc_id = Some("entry-3".into());
        assert_eq!(state.state_key(), "toc_entry_finder:entry-3");
    }

    #[test]
    fn kind_round_trip() {
        for kind in [
            AgentKind::TocFinder,
            AgentKind::TocEntryFinder,
            AgentKind::ChapterFinder,
            AgentKind::GapInvestigator,
        ] {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
    }
}
