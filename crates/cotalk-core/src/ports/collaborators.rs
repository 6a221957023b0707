//! Collaborator ports - 外部の text/音声処理
//!
//! 中身（LLM のプロンプト、音声認識モデル）はこの crate の関心外で、
//! coordination が必要とする契約だけを定義します。
//! 実装は `impls::openai` を参照。

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{CollaboratorError, SemanticUnit};

/// Speech to raw text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String, CollaboratorError>;
}

/// Raw transcript to clean annotation text.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, raw: &str) -> Result<String, CollaboratorError>;
}

/// Fold an annotator's input into the current consensus.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, consensus: &str, input: &str) -> Result<String, CollaboratorError>;
}

/// Detect a "nothing more to add" input.
#[async_trait]
pub trait CompletenessJudge: Send + Sync {
    async fn is_complete(&self, input: &str) -> Result<bool, CollaboratorError>;
}

/// Turn a finished consensus into semantic units for export.
#[async_trait]
pub trait UnitParser: Send + Sync {
    /// Clean up a caption (typos, filler words) before parsing.
    async fn refine(&self, caption: &str) -> Result<String, CollaboratorError>;

    async fn parse_units(&self, caption: &str) -> Result<Vec<SemanticUnit>, CollaboratorError>;
}
