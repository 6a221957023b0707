//! Domain identifiers (strongly-typed string keys).
//!
//! # Phantom Type パターン
//! `Key<T>` で共通実装を提供し、`T` はマーカー型としてコンパイル時にだけ使います。
//! TaskId と AnnotatorId はどちらも文字列ですが、混同するとコンパイルエラーになります。
//!
//! - **TaskId**: 画像ファイル名の stem（`P0008.png` → `P0008`）。ストレージのキー兼ファイル名。
//! - **AnnotatorId**: アノテーターの不透明な ID。永続化されるのは履歴の中だけ。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// KeyMarker は各 ID 型のマーカー trait
pub trait KeyMarker: Send + Sync + 'static {
    /// エラーメッセージ用の種別名（例: "task id"）
    fn kind() -> &'static str;

    /// 値として受け入れられるか
    fn accepts(value: &str) -> bool {
        !value.trim().is_empty()
    }
}

/// Rejected identifier value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct InvalidKey {
    pub kind: &'static str,
    pub value: String,
}

/// ジェネリック ID 型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key<T: KeyMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: KeyMarker> Key<T> {
    /// 検証付きで作成
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidKey> {
        let value = value.into();
        if !T::accepts(&value) {
            return Err(InvalidKey {
                kind: T::kind(),
                value,
            });
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: KeyMarker> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: KeyMarker> std::str::FromStr for Key<T> {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T: KeyMarker> Serialize for Key<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: KeyMarker> Deserialize<'de> for Key<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(value).map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl KeyMarker for Task {
    fn kind() -> &'static str {
        "task id"
    }

    // ファイル名になるので、パス区切りや隠しファイル名は拒否する
    fn accepts(value: &str) -> bool {
        !value.trim().is_empty()
            && !value.starts_with('.')
            && !value.contains(['/', '\\'])
    }
}

/// Annotator のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Annotator {}

impl KeyMarker for Annotator {
    fn kind() -> &'static str {
        "annotator id"
    }
}

/// Identifier of a task (one per image).
pub type TaskId = Key<Task>;

/// Identifier of an annotator (opaque, never persisted on its own).
pub type AnnotatorId = Key<Annotator>;

impl TaskId {
    /// Derive the task id from an image file name (its stem).
    pub fn from_image_name(image_name: &str) -> Result<Self, InvalidKey> {
        let stem = Path::new(image_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::parse(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn task_id_comes_from_image_stem() {
        let id = TaskId::from_image_name("P0008.png").unwrap();
        assert_eq!(id.as_str(), "P0008");
        assert_eq!(id.to_string(), "P0008");
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[case::hidden(".tmp")]
    #[case::slash("a/b")]
    #[case::backslash("a\\b")]
    fn task_id_rejects_unsafe_names(#[case] value: &str) {
        let err = TaskId::parse(value).unwrap_err();
        assert_eq!(err.kind, "task id");
    }

    #[test]
    fn annotator_id_only_rejects_blank() {
        assert!(AnnotatorId::parse("team/alice").is_ok());
        assert!(AnnotatorId::parse("").is_err());
    }

    #[test]
    fn keys_serialize_as_plain_strings() {
        let id = AnnotatorId::parse("10086").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"10086\"");

        let back: AnnotatorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TaskId>("\"\"").is_err());
    }
}
