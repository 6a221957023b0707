//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, TaskId, TaskRecord};
use crate::ports::{Mutator, Predicate, TaskStore};

/// `HashMap` behind one async mutex. Same CAS semantics as the file store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store (versions are kept as given).
    pub fn with_records(records: impl IntoIterator<Item = TaskRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<TaskRecord, StoreError> {
        let records = self.records.lock().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn cas_update(
        &self,
        id: &TaskId,
        expected_version: u64,
        mutator: Mutator,
    ) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.lock().await;
        let Some(current) = records.get(id) else {
            return Err(StoreError::NotFound(id.clone()));
        };
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                task_id: id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut next = current.clone();
        mutator(&mut next);
        next.id = id.clone();
        next.version = expected_version + 1;
        records.insert(id.clone(), next.clone());
        Ok(next)
    }

    async fn scan(&self, predicate: Predicate<'_>) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| predicate(r)).cloned().collect())
    }

    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LeaseStatus;
    use chrono::Utc;

    fn task(id: &str) -> TaskRecord {
        TaskRecord::new(TaskId::parse(id).unwrap(), format!("{id}.png"))
    }

    #[tokio::test]
    async fn cas_update_bumps_version() {
        let store = InMemoryTaskStore::with_records([task("a")]);
        let id = TaskId::parse("a").unwrap();

        let now = Utc::now();
        let updated = store
            .cas_update(&id, 0, Box::new(move |t: &mut TaskRecord| t.lock(now)))
            .await
            .unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(updated.status, LeaseStatus::Locked);
        assert_eq!(store.get(&id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_writing() {
        let store = InMemoryTaskStore::with_records([task("a")]);
        let id = TaskId::parse("a").unwrap();
        store.cas_update(&id, 0, Box::new(|_| {})).await.unwrap();

        let err = store
            .cas_update(&id, 0, Box::new(|t: &mut TaskRecord| t.mark_completed()))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict { expected: 0, actual: 1, .. }));
        assert!(!store.get(&id).await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn mutator_cannot_rewrite_identity() {
        let store = InMemoryTaskStore::with_records([task("a")]);
        let id = TaskId::parse("a").unwrap();

        let updated = store
            .cas_update(
                &id,
                0,
                Box::new(|t: &mut TaskRecord| {
                    t.id = TaskId::parse("b").unwrap();
                    t.version = 42;
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, id);
        assert_eq!(updated.version, 1);
    }

    #[tokio::test]
    async fn insert_never_overwrites() {
        let store = InMemoryTaskStore::new();
        assert!(store.insert(task("a")).await.unwrap());

        let mut changed = task("a");
        changed.consensus_text = "overwritten".to_string();
        assert!(!store.insert(changed).await.unwrap());

        let id = TaskId::parse("a").unwrap();
        assert_eq!(store.get(&id).await.unwrap().consensus_text, "");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn scan_filters_and_get_reports_missing() {
        let mut done = task("b");
        done.mark_completed();
        let store = InMemoryTaskStore::with_records([task("a"), done]);

        let open = store.scan(&|t: &TaskRecord| !t.is_completed()).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id.as_str(), "a");

        let missing = TaskId::parse("zzz").unwrap();
        assert!(matches!(store.get(&missing).await, Err(StoreError::NotFound(_))));
    }
}
