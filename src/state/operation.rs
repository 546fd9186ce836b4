//! State machine for a retriable book-level operation.

use serde::{Deserialize, Serialize};

use super::StateError;

/// Status of one pipeline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl Default for OpStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

/// Retriable operation state.
///
/// ```text
/// not-started --start--> in-progress --complete--> complete (terminal)
///                         |
///                         +--fail(n), retries+1 < n--> not-started
///                         +--fail(n), retries+1 >= n--> failed (terminal)
/// any state --reset--> not-started
/// ```
///
/// `reset` returns the status to not-started but keeps the retry counter,
/// so `fail` keeps counting attempts across resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationState {
    status: OpStatus,
    retries: u32,
}

impl OperationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin the operation. Errors unless the status is not-started.
    pub fn start(&mut self, op_name: &str) -> Result<(), StateError> {
        if self.status != OpStatus::NotStarted {
            return Err(StateError::AlreadyStarted {
                op: op_name.to_string(),
                status: self.status.as_str().to_string(),
            });
        }
        self.status = OpStatus::InProgress;
        Ok(())
    }

    /// Mark the operation complete (terminal on the happy path).
    pub fn complete(&mut self) {
        self.status = OpStatus::Complete;
    }

    /// Record a failure. Returns true when the retry limit is exhausted
    /// and the operation is now terminally failed.
    pub fn fail(&mut self, max_retries: u32) -> bool {
        self.retries += 1;
        if self.retries >= max_retries {
            self.status = OpStatus::Failed;
            true
        } else {
            self.status = OpStatus::NotStarted;
            false
        }
    }

    /// Make the operation re-runnable from any state.
    pub fn reset(&mut self) {
        self.status = OpStatus::NotStarted;
    }

    pub fn can_start(&self) -> bool {
        self.status == OpStatus::NotStarted
    }

    pub fn is_started(&self) -> bool {
        self.status == OpStatus::InProgress
    }

    pub fn is_complete(&self) -> bool {
        self.status == OpStatus::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.status == OpStatus::Failed
    }

    /// Terminal either way: complete or failed.
    pub fn is_done(&self) -> bool {
        self.is_complete() || self.is_failed()
    }

    pub fn status(&self) -> OpStatus {
        self.status
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The four persisted flag values: (started, complete, failed, retries).
    pub fn flags(&self) -> (bool, bool, bool, u32) {
        (
            self.is_started(),
            self.is_complete(),
            self.is_failed(),
            self.retries,
        )
    }

    /// Restore from persisted flags at load time.
    pub fn from_flags(started: bool, complete: bool, failed: bool, retries: u32) -> Self {
        let status = if complete {
            OpStatus::Complete
        } else if failed {
            OpStatus::Failed
        } else if started {
            OpStatus::InProgress
        } else {
            OpStatus::NotStarted
        };
        Self { status, retries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_requires_not_started() {
        let mut op = OperationState::new();
        assert!(op.can_start());
        op.start("metadata").unwrap();
        let err = op.start("metadata").unwrap_err();
        assert!(err.to_string().contains("operation already"));
    }

    #[test]
    fn complete_is_not_started() {
        let mut op = OperationState::new();
        op.start("metadata").unwrap();
        op.complete();
        assert!(op.is_complete());
        assert!(!op.is_started());
        assert!(op.is_done());
    }

    #[test]
    fn fail_retries_until_exhausted() {
        let mut op = OperationState::new();
        op.start("toc_finder").unwrap();
        assert!(!op.fail(3));
        assert_eq!(op.retries(), 1);
        assert!(op.can_start());

        op.start("toc_finder").unwrap();
        assert!(!op.fail(3));
        assert_eq!(op.retries(), 2);

        op.start("toc_finder").unwrap();
        assert!(op.fail(3));
        assert!(op.is_failed());
        assert!(op.is_done());
    }

    #[test]
    fn reset_makes_rerunnable_and_keeps_retries() {
        let mut op = OperationState::new();
        op.start("structure").unwrap();
        op.fail(5);
        op.start("structure").unwrap();
        op.complete();

        op.reset();
        assert!(op.can_start());
        assert!(!op.is_complete());
        assert_eq!(op.retries(), 1);
    }

    #[test]
    fn flags_round_trip() {
        let mut op = OperationState::new();
        op.start("link").unwrap();
        op.fail(10);
        let (started, complete, failed, retries) = op.flags();
        let restored = OperationState::from_flags(started, complete, failed, retries);
        assert_eq!(restored, op);
    }
}
