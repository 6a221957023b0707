//! Lease and completion state of a task.

use serde::{Deserialize, Serialize};

/// Persisted lock flag (`image_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Unlocked,
    Locked,
}

/// Persisted completion flag (`annotation_completed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Completion {
    Yes,
    No,
}

/// Task state derived from the two flags above.
///
/// State transitions:
/// - Unlocked -> Locked (picker claim)
/// - Locked -> Unlocked (reaper timeout, refresh, non-final submission)
/// - Locked -> Completed (submission reaching the judge signal or threshold)
/// - Unlocked -> Completed (same, for a late submission whose lease was reclaimed)
///
/// A completed task may still carry `LeaseStatus::Locked`; the lock is
/// irrelevant once completed and nothing clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Available to the picker.
    Unlocked,

    /// Leased to one annotator.
    Locked,

    /// Terminal.
    Completed,
}

impl TaskState {
    pub fn from_flags(status: LeaseStatus, completed: Completion) -> Self {
        match (completed, status) {
            (Completion::Yes, _) => TaskState::Completed,
            (Completion::No, LeaseStatus::Locked) => TaskState::Locked,
            (Completion::No, LeaseStatus::Unlocked) => TaskState::Unlocked,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Unlocked, TaskState::Locked)
                | (TaskState::Locked, TaskState::Unlocked)
                | (TaskState::Locked, TaskState::Completed)
                | (TaskState::Unlocked, TaskState::Completed)
        )
    }
}
