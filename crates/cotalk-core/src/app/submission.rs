//! SubmissionPipeline - 提出を consensus に畳み込む
//!
//! # フロー
//! 1. task を読み直す（完了済み、または同じ annotator が提出済みなら何もしない）
//! 2. コピー上で submission を追記し、consensus を更新
//!    - 最初の提出: そのまま consensus の種にする（judge は呼ばない）
//!    - 2 回目以降: judge で「もう足すことはない」か判定し、そうでなければ merge
//! 3. 提出数が閾値に届いたら完了
//! 4. コピーを 1 回の cas_update で書き込む。競合したら 1 からやり直し
//! 5. ViewRefresh で lease を手放し、次の task を返す
//!
//! collaborator が失敗したら store には何も書かない。
//! 4 が成功した後の失敗（release / pick）はエラーにせず、`next` を
//! `NoTaskAvailable` にして Accepted を返す。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CompletionThreshold;
use crate::domain::{AnnotatorId, Assignment, CotalkError, StoreError, TaskId, TaskRecord};
use crate::ports::{Clock, CompletenessJudge, Merger, TaskStore};

use super::refresh::ViewRefresh;

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Recorded. `next` is the annotator's next assignment.
    Accepted {
        #[serde(skip)]
        record: TaskRecord,
        completed: bool,
        consensus_text: String,
        next: Assignment,
    },
    /// Blank text, unknown task, a completed task, or an annotator who already submitted.
    Ignored {
        #[serde(skip)]
        current: Option<TaskRecord>,
    },
}

pub struct SubmissionPipeline {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    judge: Arc<dyn CompletenessJudge>,
    merger: Arc<dyn Merger>,
    threshold: CompletionThreshold,
    cas_retries: u32,
    refresh: Arc<ViewRefresh>,
}

impl SubmissionPipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        judge: Arc<dyn CompletenessJudge>,
        merger: Arc<dyn Merger>,
        threshold: CompletionThreshold,
        cas_retries: u32,
        refresh: Arc<ViewRefresh>,
    ) -> Self {
        Self {
            store,
            clock,
            judge,
            merger,
            threshold,
            cas_retries,
            refresh,
        }
    }

    pub async fn submit(
        &self,
        task_id: &TaskId,
        annotator: &AnnotatorId,
        text: &str,
    ) -> Result<SubmitOutcome, CotalkError> {
        if text.trim().is_empty() {
            tracing::debug!(task_id = %task_id, annotator = %annotator, "blank submission ignored");
            let current = self.store.get(task_id).await.ok();
            return Ok(SubmitOutcome::Ignored { current });
        }

        for attempt in 1..=self.cas_retries {
            let task = match self.store.get(task_id).await {
                Ok(task) => task,
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!(task_id = %task_id, annotator = %annotator, "submission for unknown task ignored");
                    return Ok(SubmitOutcome::Ignored { current: None });
                }
                Err(e) => return Err(e.into()),
            };
            if task.is_completed() {
                tracing::info!(task_id = %task_id, annotator = %annotator, "task already completed, submission ignored");
                return Ok(SubmitOutcome::Ignored { current: Some(task) });
            }
            if task.has_annotator(annotator) {
                tracing::info!(task_id = %task_id, annotator = %annotator, "annotator already submitted, submission ignored");
                return Ok(SubmitOutcome::Ignored { current: Some(task) });
            }

            let expected = task.version;
            let prepared = self.apply(task, annotator, text, self.clock.now()).await?;
            let completed = prepared.is_completed();

            match self
                .store
                .cas_update(task_id, expected, Box::new(move |t: &mut TaskRecord| *t = prepared))
                .await
            {
                Ok(record) => {
                    tracing::info!(
                        task_id = %task_id,
                        annotator = %annotator,
                        submissions = record.submission_history.len(),
                        completed,
                        "submission recorded"
                    );
                    let next = self.hand_off(task_id, annotator).await;
                    return Ok(SubmitOutcome::Accepted {
                        completed,
                        consensus_text: record.consensus_text.clone(),
                        record,
                        next,
                    });
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(task_id = %task_id, attempt, "task changed while submitting, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CotalkError::Conflict {
            task_id: task_id.clone(),
            attempts: self.cas_retries,
        })
    }

    /// Release the submitted task and pick the next one. The submission is
    /// already stored, so a failure here only costs the next assignment.
    async fn hand_off(&self, task_id: &TaskId, annotator: &AnnotatorId) -> Assignment {
        match self.refresh.refresh(Some(task_id), annotator).await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(task_id = %task_id, annotator = %annotator, error = %e, "hand-off after submission failed");
                Assignment::NoTaskAvailable
            }
        }
    }

    /// Fold one submission into `task`. Pure apart from the collaborator calls.
    async fn apply(
        &self,
        mut task: TaskRecord,
        annotator: &AnnotatorId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, CotalkError> {
        let before = task.state();
        task.record_submission(annotator.clone(), text, now);

        if task.consensus_history.is_empty() {
            task.push_consensus(text.to_string(), now);
        } else if self.judge.is_complete(text).await? {
            tracing::debug!(task_id = %task.id, "annotator reports nothing left to add");
            task.mark_completed();
        } else {
            let merged = self.merger.merge(&task.consensus_text, text).await?;
            tracing::debug!(task_id = %task.id, merged = %merged, "consensus merged");
            task.push_consensus(merged, now);
        }

        if self.threshold.is_reached(task.submission_history.len()) {
            task.mark_completed();
        }

        debug_assert!(
            before == task.state() || before.can_transition_to(task.state()),
            "illegal transition {before:?} -> {:?}",
            task.state()
        );
        Ok(task)
    }
}
