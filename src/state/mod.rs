//! In-memory pipeline state: the book aggregate and its sub-state.

mod book;
mod operation;
mod page;
mod registry;

pub use book::{BookConfig, BookState, PromptInfo, SourcePdf, StageToggles};
pub use operation::{OpStatus, OperationState};
pub use page::PageState;
pub use registry::{OpKind, OpSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("operation already {status}: {op}")]
    AlreadyStarted { op: String, status: String },
    #[error("invalid page number: {0}")]
    InvalidPage(u32),
    #[error("unknown agent kind: {0}")]
    UnknownAgentKind(String),
    #[error("no chapter matches key {0}")]
    UnknownChapter(String),
    #[error("no ToC entry matches id {0}")]
    UnknownEntry(String),
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}
