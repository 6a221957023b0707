//! Domain model (ids, task record, state machine, errors).
//!
//! - **ids**: TaskId / AnnotatorId（phantom type で区別）
//! - **task**: TaskRecord と履歴、annotator に渡す TaskHandle
//! - **state**: LeaseStatus / Completion と導出された TaskState
//! - **units**: consensus を分解した SemanticUnit（export 用）
//! - **errors**: StoreError / CollaboratorError / CotalkError
//! - **timefmt**: record に保存する時刻の書式

pub mod errors;
pub mod ids;
pub mod state;
pub mod task;
pub mod timefmt;
pub mod units;

pub use errors::{CollaboratorError, CollaboratorKind, CotalkError, StoreError};
pub use ids::{AnnotatorId, InvalidKey, TaskId};
pub use state::{Completion, LeaseStatus, TaskState};
pub use task::{Assignment, ConsensusRevision, PromptKind, Submission, TaskHandle, TaskRecord};
pub use units::SemanticUnit;
