//! Errors - エラー型と分類
//!
//! - `StoreError`: TaskStore port のエラー（record 単位）
//! - `CollaboratorError`: 外部 collaborator（LLM, 音声認識）のエラー
//! - `CotalkError`: アプリケーション層のエラー（上 2 つを包む）

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::ids::TaskId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("version conflict on {task_id}: expected {expected}, found {actual}")]
    Conflict {
        task_id: TaskId,
        expected: u64,
        actual: u64,
    },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt task record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which collaborator an error or requirement refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollaboratorKind {
    Transcriber,
    Normalizer,
    Merger,
    Judge,
    UnitParser,
}

impl fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollaboratorKind::Transcriber => "transcriber",
            CollaboratorKind::Normalizer => "normalizer",
            CollaboratorKind::Merger => "merger",
            CollaboratorKind::Judge => "completeness judge",
            CollaboratorKind::UnitParser => "semantic unit parser",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{kind} request failed: {source}")]
    Request {
        kind: CollaboratorKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unparseable {kind} response: {reply:?}")]
    Unparseable { kind: CollaboratorKind, reply: String },

    #[error("{0} is not configured")]
    NotConfigured(CollaboratorKind),
}

#[derive(Debug, Error)]
pub enum CotalkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("task {task_id} still conflicting after {attempts} attempts")]
    Conflict { task_id: TaskId, attempts: u32 },

    #[error("audio archive failed for {}: {source}", .path.display())]
    Audio {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export failed for {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
