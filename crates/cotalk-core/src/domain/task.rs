//! Task record: per-image annotation state + histories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AnnotatorId, TaskId};
use super::state::{Completion, LeaseStatus, TaskState};
use super::timefmt;

/// One annotator input, as appended by the submission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SubmissionWire", into = "SubmissionWire")]
pub struct Submission {
    pub seq: u32,
    pub annotator: AnnotatorId,
    pub text: String,
    /// Lease time of the submitting session (absent if the lease was already reclaimed).
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

/// One consensus revision (seed or merge result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRevision {
    #[serde(rename = "id")]
    pub seq: u32,
    #[serde(rename = "description")]
    pub text: String,
    #[serde(rename = "start_time", with = "timefmt::optional", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "end_time", with = "timefmt::required")]
    pub ended_at: DateTime<Utc>,
}

// `annotation_history` entries nest the payload under `annotation_info`.
#[derive(Serialize, Deserialize)]
struct SubmissionWire {
    id: u32,
    annotation_info: SubmissionInfo,
}

#[derive(Serialize, Deserialize)]
struct SubmissionInfo {
    annotator_id: AnnotatorId,
    annotation: String,
    #[serde(with = "timefmt::optional", default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(with = "timefmt::required")]
    end_time: DateTime<Utc>,
}

impl From<SubmissionWire> for Submission {
    fn from(wire: SubmissionWire) -> Self {
        Self {
            seq: wire.id,
            annotator: wire.annotation_info.annotator_id,
            text: wire.annotation_info.annotation,
            started_at: wire.annotation_info.start_time,
            ended_at: wire.annotation_info.end_time,
        }
    }
}

impl From<Submission> for SubmissionWire {
    fn from(s: Submission) -> Self {
        Self {
            id: s.seq,
            annotation_info: SubmissionInfo {
                annotator_id: s.annotator,
                annotation: s.text,
                start_time: s.started_at,
                end_time: s.ended_at,
            },
        }
    }
}

/// The single source of truth for one image.
///
/// Design:
/// - Stores hand out clones; every change goes back through `TaskStore::cas_update`.
/// - `version` belongs to the store. Mutators must not touch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub image_name: String,
    pub status: LeaseStatus,
    /// Set iff `status == Locked`.
    pub lease_time: Option<DateTime<Utc>>,
    pub completed: Completion,
    pub consensus_text: String,
    pub consensus_history: Vec<ConsensusRevision>,
    pub submission_history: Vec<Submission>,
    pub version: u64,
}

impl TaskRecord {
    /// Fresh record as created at pool initialization.
    pub fn new(id: TaskId, image_name: impl Into<String>) -> Self {
        Self {
            id,
            image_name: image_name.into(),
            status: LeaseStatus::Unlocked,
            lease_time: None,
            completed: Completion::No,
            consensus_text: String::new(),
            consensus_history: Vec::new(),
            submission_history: Vec::new(),
            version: 0,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_flags(self.status, self.completed)
    }

    pub fn is_completed(&self) -> bool {
        self.completed == Completion::Yes
    }

    pub fn has_annotator(&self, annotator: &AnnotatorId) -> bool {
        self.submission_history
            .iter()
            .any(|s| &s.annotator == annotator)
    }

    /// Unlocked, incomplete, and not yet annotated by `annotator`.
    pub fn is_eligible_for(&self, annotator: &AnnotatorId) -> bool {
        self.status == LeaseStatus::Unlocked && !self.is_completed() && !self.has_annotator(annotator)
    }

    /// Locked, incomplete, and held for strictly longer than `timeout` at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != LeaseStatus::Locked || self.is_completed() {
            return false;
        }
        match self.lease_time {
            Some(leased_at) => now
                .signed_duration_since(leased_at)
                .to_std()
                .is_ok_and(|elapsed| elapsed > timeout),
            // Locked without a lease time breaks the record invariant; its age is unknown.
            None => true,
        }
    }

    /// Claim the lease.
    pub fn lock(&mut self, now: DateTime<Utc>) {
        self.status = LeaseStatus::Locked;
        self.lease_time = Some(now);
    }

    /// Release the lease.
    pub fn unlock(&mut self) {
        self.status = LeaseStatus::Unlocked;
        self.lease_time = None;
    }

    /// Whether `unlock()` would change anything.
    pub fn is_released(&self) -> bool {
        self.status == LeaseStatus::Unlocked && self.lease_time.is_none()
    }

    pub fn mark_completed(&mut self) {
        self.completed = Completion::Yes;
    }

    /// Append an annotator input with the next sequence number.
    pub fn record_submission(&mut self, annotator: AnnotatorId, text: &str, now: DateTime<Utc>) {
        let seq = self.submission_history.len() as u32 + 1;
        self.submission_history.push(Submission {
            seq,
            annotator,
            text: text.to_string(),
            started_at: self.lease_time,
            ended_at: now,
        });
    }

    /// Replace the consensus and append it as the next revision.
    ///
    /// The first revision seeds the consensus verbatim; later ones are merge results.
    pub fn push_consensus(&mut self, text: String, now: DateTime<Utc>) {
        let seq = self.consensus_history.len() as u32 + 1;
        self.consensus_history.push(ConsensusRevision {
            seq,
            text: text.clone(),
            started_at: self.lease_time,
            ended_at: now,
        });
        self.consensus_text = text;
    }

    /// View handed to the annotator.
    pub fn handle(&self, image_dir: &Path) -> TaskHandle {
        let prompt = if self.consensus_text.is_empty() {
            PromptKind::Describe
        } else {
            PromptKind::Supplement
        };
        TaskHandle {
            task_id: self.id.clone(),
            image: image_dir.join(&self.image_name),
            consensus_text: self.consensus_text.clone(),
            prompt,
        }
    }
}

/// What the annotator is asked to do with the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// No consensus yet: describe the whole image.
    Describe,
    /// Point out what the current consensus misses or gets wrong.
    Supplement,
}

impl PromptKind {
    pub fn instruction(self) -> &'static str {
        match self {
            PromptKind::Describe => {
                "Please follow the sample format and describe the image in detail."
            }
            PromptKind::Supplement => {
                "Please point out what is missing or incorrect in the previous annotation. \
                 If you believe the annotation is already complete, simply enter 'none'."
            }
        }
    }
}

/// A leased task as seen by the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub image: PathBuf,
    pub consensus_text: String,
    pub prompt: PromptKind,
}

/// Result of asking for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    Task(TaskHandle),
    /// Nothing eligible right now. Not an error.
    NoTaskAvailable,
}

impl Assignment {
    pub fn task(&self) -> Option<&TaskHandle> {
        match self {
            Assignment::Task(handle) => Some(handle),
            Assignment::NoTaskAvailable => None,
        }
    }
}
