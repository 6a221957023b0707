//! TaskStore port - task record の正本（source of truth）
//!
//! # 設計原則
//! - 変更はすべて `cas_update` を通す（直接の上書きは無い）
//! - version による楽観ロック: 読んだ version と一致したときだけ mutator を適用
//! - 1 record の破損・読み込み失敗は scan 全体を止めない（ログして skip）
//! - 保存媒体（ファイル、KV、DB）はこの trait の裏に隠す

use async_trait::async_trait;

use crate::domain::{StoreError, TaskId, TaskRecord};

/// Change applied to a record inside a successful compare-and-swap.
///
/// The store restores `id` and sets `version` after the mutator runs.
pub type Mutator = Box<dyn FnOnce(&mut TaskRecord) + Send>;

/// Filter for `TaskStore::scan`.
pub type Predicate<'a> = &'a (dyn Fn(&TaskRecord) -> bool + Send + Sync);

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Read one record.
    async fn get(&self, id: &TaskId) -> Result<TaskRecord, StoreError>;

    /// Apply `mutator` iff the stored version equals `expected_version`.
    ///
    /// On success the record is persisted atomically with `version + 1` and
    /// returned. Otherwise `StoreError::Conflict` and nothing is written.
    async fn cas_update(
        &self,
        id: &TaskId,
        expected_version: u64,
        mutator: Mutator,
    ) -> Result<TaskRecord, StoreError>;

    /// All readable records matching `predicate`, in no particular order.
    ///
    /// Unreadable records are logged and skipped. Only a failure to enumerate
    /// the store as a whole is an error.
    async fn scan(&self, predicate: Predicate<'_>) -> Result<Vec<TaskRecord>, StoreError>;

    /// Create a record if none exists under its id. Returns `false` if one did.
    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError>;
}
