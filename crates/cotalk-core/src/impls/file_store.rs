//! FileTaskStore - 1 task = 1 JSON ファイル
//!
//! # 実装詳細
//! - `<dir>/<task_id>.json` に pretty-printed JSON で保存
//! - 書き込みは一時ファイル（`.<task_id>.<ulid>.tmp`）→ fsync → rename で atomic に置き換え
//! - task ごとの async Mutex で read-compare-write をプロセス内で直列化
//! - キャッシュは持たない（毎回ファイルを読む）

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::domain::{
    Completion, ConsensusRevision, LeaseStatus, StoreError, Submission, TaskId, TaskRecord, timefmt,
};
use crate::ports::{Mutator, Predicate, TaskStore};

/// Stored layout of one task file.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDocument {
    image_name: String,
    image_status: LeaseStatus,
    annotation_completed: Completion,
    #[serde(with = "timefmt::optional", default)]
    lock_time: Option<DateTime<Utc>>,
    #[serde(default)]
    overall_annotation: String,
    #[serde(default)]
    overall_annotation_history: Vec<ConsensusRevision>,
    #[serde(default)]
    annotation_history: Vec<Submission>,
    #[serde(default)]
    version: u64,
}

impl TaskDocument {
    fn from_record(record: &TaskRecord) -> Self {
        Self {
            image_name: record.image_name.clone(),
            image_status: record.status,
            annotation_completed: record.completed,
            lock_time: record.lease_time,
            overall_annotation: record.consensus_text.clone(),
            overall_annotation_history: record.consensus_history.clone(),
            annotation_history: record.submission_history.clone(),
            version: record.version,
        }
    }

    fn into_record(self, id: TaskId) -> TaskRecord {
        TaskRecord {
            id,
            image_name: self.image_name,
            status: self.image_status,
            lease_time: self.lock_time,
            completed: self.annotation_completed,
            consensus_text: self.overall_annotation,
            consensus_history: self.overall_annotation_history,
            submission_history: self.annotation_history,
            version: self.version,
        }
    }
}

/// `record` in the stored task-file layout, for tools that write copies of it.
pub fn stored_document(record: &TaskRecord) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(TaskDocument::from_record(record))
}

pub struct FileTaskStore {
    dir: PathBuf,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_for(&self, id: &TaskId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    async fn read(&self, id: &TaskId) -> Result<TaskRecord, StoreError> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let document: TaskDocument = serde_json::from_slice(&bytes)
            .map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(document.into_record(id.clone()))
    }

    async fn write_atomic(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.id);
        let tmp = self.dir.join(format!(".{}.{}.tmp", record.id, Ulid::new()));
        let bytes = serde_json::to_vec_pretty(&TaskDocument::from_record(record))
            .map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = write_synced(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io { path: tmp, source });
        }
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io { path, source });
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Task id for a directory entry, if it names a task file.
fn task_id_of(path: &Path) -> Option<TaskId> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    // temp files and other hidden entries are rejected by TaskId itself
    TaskId::parse(stem).ok()
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn get(&self, id: &TaskId) -> Result<TaskRecord, StoreError> {
        self.read(id).await
    }

    async fn cas_update(
        &self,
        id: &TaskId,
        expected_version: u64,
        mutator: Mutator,
    ) -> Result<TaskRecord, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current = self.read(id).await?;
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                task_id: id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut next = current;
        mutator(&mut next);
        next.id = id.clone();
        next.version = expected_version + 1;
        self.write_atomic(&next).await?;
        Ok(next)
    }

    async fn scan(&self, predicate: Predicate<'_>) -> Result<Vec<TaskRecord>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut matched = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StoreError::Io {
                        path: self.dir.clone(),
                        source,
                    });
                }
            };
            let Some(id) = task_id_of(&entry.path()) else {
                continue;
            };
            match self.read(&id).await {
                Ok(record) if predicate(&record) => matched.push(record),
                Ok(_) => {}
                // removed between listing and reading
                Err(StoreError::NotFound(_)) => {}
                Err(e) => tracing::warn!(task_id = %id, error = %e, "skipping unreadable task record"),
            }
        }
        Ok(matched)
    }

    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError> {
        let lock = self.lock_for(&record.id);
        let _guard = lock.lock().await;

        let path = self.path_for(&record.id);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io { path, source })?;
        if exists {
            return Ok(false);
        }
        self.write_atomic(&record).await?;
        Ok(true)
    }
}
