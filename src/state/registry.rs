//! Declarative registry of pipeline operations.
//!
//! Each operation declares where its flags persist, which operations a
//! reset of it cascades to, and which agent checkpoints it owns. The
//! persisters and the reset path walk this table instead of hardcoding
//! per-operation behavior.

use crate::models::AgentKind;
use crate::store::collections;

/// The fixed set of book-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Metadata,
    TocFinder,
    TocExtract,
    TocLink,
    TocFinalize,
    Structure,
}

/// Registry entry for one operation kind.
pub struct OpSpec {
    /// Collection owning the operation's persisted flags.
    pub collection: &'static str,
    /// Flags persist as `{prefix}_started`, `{prefix}_complete`,
    /// `{prefix}_failed`, `{prefix}_retries`.
    pub field_prefix: &'static str,
    /// Operations a reset of this one must also reset, in cascade order.
    pub cascade: &'static [OpKind],
    /// Agent checkpoint kinds owned by this operation; deleted on reset.
    pub agent_kinds: &'static [AgentKind],
}

static METADATA: OpSpec = OpSpec {
    collection: collections::BOOK,
    field_prefix: "metadata",
    cascade: &[],
    agent_kinds: &[],
};

static TOC_FINDER: OpSpec = OpSpec {
    collection: collections::TOC,
    field_prefix: "finder",
    cascade: &[
        OpKind::TocExtract,
        OpKind::TocLink,
        OpKind::TocFinalize,
        OpKind::Structure,
    ],
    agent_kinds: &[AgentKind::TocFinder],
};

static TOC_EXTRACT: OpSpec = OpSpec {
    collection: collections::TOC,
    field_prefix: "extract",
    cascade: &[OpKind::TocLink, OpKind::TocFinalize, OpKind::Structure],
    agent_kinds: &[],
};

static TOC_LINK: OpSpec = OpSpec {
    collection: collections::TOC,
    field_prefix: "link",
    cascade: &[OpKind::TocFinalize, OpKind::Structure],
    agent_kinds: &[AgentKind::TocEntryFinder],
};

static TOC_FINALIZE: OpSpec = OpSpec {
    collection: collections::TOC,
    field_prefix: "finalize",
    cascade: &[OpKind::Structure],
    agent_kinds: &[AgentKind::ChapterFinder, AgentKind::GapInvestigator],
};

static STRUCTURE: OpSpec = OpSpec {
    collection: collections::BOOK,
    field_prefix: "structure",
    cascade: &[],
    agent_kinds: &[],
};

impl OpKind {
    pub const ALL: [OpKind; 6] = [
        OpKind::Metadata,
        OpKind::TocFinder,
        OpKind::TocExtract,
        OpKind::TocLink,
        OpKind::TocFinalize,
        OpKind::Structure,
    ];

    pub fn spec(self) -> &'static OpSpec {
        match self {
            Self::Metadata => &METADATA,
            Self::TocFinder => &TOC_FINDER,
            Self::TocExtract => &TOC_EXTRACT,
            Self::TocLink => &TOC_LINK,
            Self::TocFinalize => &TOC_FINALIZE,
            Self::Structure => &STRUCTURE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::TocFinder => "toc_finder",
            Self::TocExtract => "toc_extract",
            Self::TocLink => "toc_link",
            Self::TocFinalize => "toc_finalize",
            Self::Structure => "structure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metadata" => Some(Self::Metadata),
            "toc_finder" => Some(Self::TocFinder),
            "toc_extract" => Some(Self::TocExtract),
            "toc_link" => Some(Self::TocLink),
            "toc_finalize" => Some(Self::TocFinalize),
            "structure" => Some(Self::Structure),
            _ => None,
        }
    }

    /// The reset set: this operation followed by its cascade, in order.
    pub fn reset_set(self) -> Vec<OpKind> {
        let mut ops = vec![self];
        ops.extend_from_slice(self.spec().cascade);
        ops
    }

    /// Persisted flag field names for this operation.
    pub fn flag_fields(self) -> [String; 4] {
        let prefix = self.spec().field_prefix;
        [
            format!("{prefix}_started"),
            format!("{prefix}_complete"),
            format!("{prefix}_failed"),
            format!("{prefix}_retries"),
        ]
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
