//! Data models shared across the pipeline.

mod agent;
mod book;
mod chapter;
mod pattern;
mod toc;

pub use agent::{AgentKind, AgentRunSummary, AgentState};
pub use book::{BookMetadata, BookStatus};
pub use chapter::{Chapter, ContentType, MatterType};
pub use pattern::{ChapterRange, GapRange, PatternContext, PatternResult};
pub use toc::{EntrySource, EntryToFind, TocEntry};
