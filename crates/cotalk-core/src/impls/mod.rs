//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileTaskStore**: 1 画像 1 JSON ファイルの正本（本番用）
//! - **InMemoryTaskStore**: テスト用の正本
//! - **OpenAiChat / OpenAiTranscriber**: OpenAI 互換 API の collaborator

pub mod file_store;
pub mod memory_store;
pub mod openai;

// 主要な型を再エクスポート
pub use self::file_store::{FileTaskStore, stored_document};
pub use self::memory_store::InMemoryTaskStore;
pub use self::openai::{OpenAiChat, OpenAiTranscriber, extract_caption, extract_units};
