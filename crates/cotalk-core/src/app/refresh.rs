//! ViewRefresh - 今の lease を手放して別の task を取り直す
//!
//! 1. 指定 task が未完了ならロックを外す（すでに外れていれば書き込まない）
//! 2. LeasePicker::pick() で新しい task を取る
//!
//! 同じ annotator が連続で呼んでも、release の二重実行は store の状態を変えない。

use std::sync::Arc;

use crate::domain::{AnnotatorId, Assignment, CotalkError, StoreError, TaskId, TaskRecord};
use crate::ports::TaskStore;

use super::picker::LeasePicker;

pub struct ViewRefresh {
    store: Arc<dyn TaskStore>,
    picker: Arc<LeasePicker>,
    cas_retries: u32,
}

impl ViewRefresh {
    pub fn new(store: Arc<dyn TaskStore>, picker: Arc<LeasePicker>, cas_retries: u32) -> Self {
        Self {
            store,
            picker,
            cas_retries,
        }
    }

    /// Release `current` (if any) and pick a fresh task for `annotator`.
    pub async fn refresh(
        &self,
        current: Option<&TaskId>,
        annotator: &AnnotatorId,
    ) -> Result<Assignment, CotalkError> {
        if let Some(task_id) = current {
            self.release(task_id).await?;
        }
        self.picker.pick(annotator).await
    }

    /// Unlock `task_id` unless it is completed or already unlocked.
    ///
    /// The lease holder is not checked: any caller naming the task releases it.
    pub async fn release(&self, task_id: &TaskId) -> Result<(), CotalkError> {
        for attempt in 1..=self.cas_retries {
            let task = match self.store.get(task_id).await {
                Ok(task) => task,
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(task_id = %task_id, "nothing to release, task not found");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "cannot read task, release skipped");
                    return Ok(());
                }
            };
            if task.is_completed() || task.is_released() {
                return Ok(());
            }

            match self
                .store
                .cas_update(task_id, task.version, Box::new(|t: &mut TaskRecord| t.unlock()))
                .await
            {
                Ok(_) => {
                    tracing::debug!(task_id = %task_id, leased_at = ?task.lease_time, "lease released");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(task_id = %task_id, attempt, "release raced with another writer, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CotalkError::Conflict {
            task_id: task_id.clone(),
            attempts: self.cas_retries,
        })
    }
}
