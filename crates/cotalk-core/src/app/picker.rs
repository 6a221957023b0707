//! LeasePicker - annotator に task を 1 件割り当てる
//!
//! # フロー
//! 1. TaskStore::scan() で eligible な task を列挙
//!    （Unlocked ∧ 未完了 ∧ この annotator がまだ提出していない）
//! 2. 順序をシャッフル（同時に走る picker が同じ先頭 record を奪い合わないように）
//! 3. 先頭から TaskStore::cas_update() で Locked + lease_time=now にする
//! 4. CAS に負けたら次の候補へ。全滅なら NoTaskAvailable

use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::domain::{AnnotatorId, Assignment, CotalkError, StoreError, TaskRecord};
use crate::ports::{Clock, TaskStore};

pub struct LeasePicker {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    image_dir: PathBuf,
}

impl LeasePicker {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            clock,
            image_dir: image_dir.into(),
        }
    }

    /// Claim one eligible task for `annotator`.
    pub async fn pick(&self, annotator: &AnnotatorId) -> Result<Assignment, CotalkError> {
        let eligible = |task: &TaskRecord| task.is_eligible_for(annotator);
        let mut candidates = self.store.scan(&eligible).await?;
        candidates.shuffle(&mut rand::thread_rng());

        for candidate in candidates {
            let now = self.clock.now();
            let claim = self
                .store
                .cas_update(&candidate.id, candidate.version, Box::new(move |t: &mut TaskRecord| t.lock(now)))
                .await;

            match claim {
                Ok(task) => {
                    tracing::info!(task_id = %task.id, annotator = %annotator, "task leased");
                    return Ok(Assignment::Task(task.handle(&self.image_dir)));
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(task_id = %candidate.id, "lost claim race, trying next candidate");
                }
                Err(e) => {
                    tracing::warn!(task_id = %candidate.id, error = %e, "failed to claim task, skipping");
                }
            }
        }

        tracing::debug!(annotator = %annotator, "no task available");
        Ok(Assignment::NoTaskAvailable)
    }
}
