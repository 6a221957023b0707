//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_collaborators() で、この process が使う collaborator を宣言
//! - build() 時に「期待集合 ⊆ 設定済み集合」をチェック
//! - 不足があれば BuildError を返す（最初の submit で落ちるより先に）

use std::path::Path;
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::domain::{
    AnnotatorId, Assignment, CollaboratorError, CollaboratorKind, CotalkError, TaskId,
};
use crate::impls::FileTaskStore;
use crate::ports::{
    Clock, CompletenessJudge, Merger, Normalizer, SystemClock, TaskStore, Transcriber, UnitParser,
};

use super::picker::LeasePicker;
use super::pool::{InitReport, init_pool};
use super::reaper_loop::{LeaseReaper, ReaperLoop};
use super::refresh::ViewRefresh;
use super::semantic_units::{ExportReport, UnitExport};
use super::status::{PoolCounts, pool_status};
use super::submission::{SubmissionPipeline, SubmitOutcome};
use super::transcription::Transcription;

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .merger(chat.clone())
///     .judge(chat)
///     .expect_collaborators(&[CollaboratorKind::Merger, CollaboratorKind::Judge])
///     .build()?;
/// ```
///
/// store を渡さなければ `config.task_dir` の FileTaskStore、
/// clock を渡さなければ SystemClock を使う。
pub struct AppBuilder {
    config: CoordinatorConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    normalizer: Option<Arc<dyn Normalizer>>,
    merger: Option<Arc<dyn Merger>>,
    judge: Option<Arc<dyn CompletenessJudge>>,
    unit_parser: Option<Arc<dyn UnitParser>>,
    expected: Vec<CollaboratorKind>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}. These were expected but not configured.")]
    MissingCollaborators(Vec<CollaboratorKind>),
}

impl AppBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            transcriber: None,
            normalizer: None,
            merger: None,
            judge: None,
            unit_parser: None,
            expected: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn merger(mut self, merger: Arc<dyn Merger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn judge(mut self, judge: Arc<dyn CompletenessJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn unit_parser(mut self, parser: Arc<dyn UnitParser>) -> Self {
        self.unit_parser = Some(parser);
        self
    }

    /// Collaborators that `build()` must find configured.
    pub fn expect_collaborators(mut self, kinds: &[CollaboratorKind]) -> Self {
        self.expected = kinds.to_vec();
        self
    }

    fn is_configured(&self, kind: CollaboratorKind) -> bool {
        match kind {
            CollaboratorKind::Transcriber => self.transcriber.is_some(),
            CollaboratorKind::Normalizer => self.normalizer.is_some(),
            CollaboratorKind::Merger => self.merger.is_some(),
            CollaboratorKind::Judge => self.judge.is_some(),
            CollaboratorKind::UnitParser => self.unit_parser.is_some(),
        }
    }

    pub fn build(self) -> Result<App, BuildError> {
        let missing: Vec<CollaboratorKind> = self
            .expected
            .iter()
            .copied()
            .filter(|kind| !self.is_configured(*kind))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingCollaborators(missing));
        }

        let config = Arc::new(self.config);
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileTaskStore::new(config.task_dir.clone())),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let picker = Arc::new(LeasePicker::new(store.clone(), clock.clone(), config.image_dir.clone()));
        let refresh = Arc::new(ViewRefresh::new(store.clone(), picker.clone(), config.cas_retries));
        let reaper = Arc::new(LeaseReaper::new(store.clone(), clock.clone()));

        let submission = match (self.judge, self.merger) {
            (Some(judge), Some(merger)) => Ok(SubmissionPipeline::new(
                store.clone(),
                clock.clone(),
                judge,
                merger,
                config.completion,
                config.cas_retries,
                refresh.clone(),
            )),
            (None, _) => Err(CollaboratorKind::Judge),
            (_, None) => Err(CollaboratorKind::Merger),
        };
        let transcription = match (self.transcriber, self.normalizer) {
            (Some(transcriber), Some(normalizer)) => Ok(Transcription::new(
                transcriber,
                normalizer,
                clock,
                config.audio_dir.clone(),
            )),
            (None, _) => Err(CollaboratorKind::Transcriber),
            (_, None) => Err(CollaboratorKind::Normalizer),
        };

        let export = self
            .unit_parser
            .map(|parser| UnitExport::new(store.clone(), parser))
            .ok_or(CollaboratorKind::UnitParser);

        Ok(App {
            config,
            store,
            picker,
            refresh,
            reaper,
            submission,
            transcription,
            export,
        })
    }
}

/// Wired coordinator. Cheap to share behind an `Arc`.
pub struct App {
    config: Arc<CoordinatorConfig>,
    store: Arc<dyn TaskStore>,
    picker: Arc<LeasePicker>,
    refresh: Arc<ViewRefresh>,
    reaper: Arc<LeaseReaper>,
    /// `Err` names the first collaborator the pipeline lacks.
    submission: Result<SubmissionPipeline, CollaboratorKind>,
    transcription: Result<Transcription, CollaboratorKind>,
    export: Result<UnitExport, CollaboratorKind>,
}

impl App {
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub async fn pick(&self, annotator: &AnnotatorId) -> Result<Assignment, CotalkError> {
        self.picker.pick(annotator).await
    }

    pub async fn submit(
        &self,
        task_id: &TaskId,
        annotator: &AnnotatorId,
        text: &str,
    ) -> Result<SubmitOutcome, CotalkError> {
        let pipeline = self
            .submission
            .as_ref()
            .map_err(|kind| CollaboratorError::NotConfigured(*kind))?;
        pipeline.submit(task_id, annotator, text).await
    }

    pub async fn refresh(
        &self,
        current: Option<&TaskId>,
        annotator: &AnnotatorId,
    ) -> Result<Assignment, CotalkError> {
        self.refresh.refresh(current, annotator).await
    }

    /// One reaper pass with the configured timeout.
    pub async fn sweep(&self) -> Result<usize, CotalkError> {
        self.reaper.sweep(self.config.lease_timeout).await
    }

    /// Start the periodic reaper with the configured interval and timeout.
    pub fn spawn_reaper(&self) -> ReaperLoop {
        ReaperLoop::spawn(
            self.reaper.clone(),
            self.config.sweep_interval,
            self.config.lease_timeout,
        )
    }

    pub async fn status(&self) -> Result<PoolCounts, CotalkError> {
        Ok(pool_status(self.store.as_ref()).await?)
    }

    pub async fn init_pool(&self) -> Result<InitReport, CotalkError> {
        Ok(init_pool(&self.config.image_dir, self.store.as_ref()).await?)
    }

    pub async fn transcribe(&self, task_id: &TaskId, audio: &Path) -> Result<String, CotalkError> {
        let transcription = self
            .transcription
            .as_ref()
            .map_err(|kind| CollaboratorError::NotConfigured(*kind))?;
        transcription.transcribe(task_id, audio).await
    }

    /// Write semantic units for every task with a consensus into `save_dir`.
    pub async fn export_units(&self, save_dir: &Path) -> Result<ExportReport, CotalkError> {
        let export = self
            .export
            .as_ref()
            .map_err(|kind| CollaboratorError::NotConfigured(*kind))?;
        export.export(save_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskRecord;
    use crate::impls::InMemoryTaskStore;
    use async_trait::async_trait;

    struct Concat;

    #[async_trait]
    impl Merger for Concat {
        async fn merge(&self, consensus: &str, input: &str) -> Result<String, CollaboratorError> {
            Ok(format!("{consensus} {input}"))
        }
    }

    #[async_trait]
    impl CompletenessJudge for Concat {
        async fn is_complete(&self, _input: &str) -> Result<bool, CollaboratorError> {
            Ok(false)
        }
    }

    fn memory_store() -> Arc<InMemoryTaskStore> {
        Arc::new(InMemoryTaskStore::with_records([TaskRecord::new(
            TaskId::parse("a").unwrap(),
            "a.png",
        )]))
    }

    #[test]
    fn build_success() {
        let app = AppBuilder::new(CoordinatorConfig::default())
            .merger(Arc::new(Concat))
            .judge(Arc::new(Concat))
            .expect_collaborators(&[CollaboratorKind::Merger, CollaboratorKind::Judge])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_missing_collaborators() {
        let app = AppBuilder::new(CoordinatorConfig::default())
            .merger(Arc::new(Concat))
            .expect_collaborators(&[
                CollaboratorKind::Merger,
                CollaboratorKind::Judge,
                CollaboratorKind::Transcriber,
            ])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingCollaborators(missing))
                if missing == vec![CollaboratorKind::Judge, CollaboratorKind::Transcriber]
        ));
    }

    #[tokio::test]
    async fn submit_without_collaborators_is_not_configured() {
        let app = AppBuilder::new(CoordinatorConfig::default())
            .store(memory_store())
            .build()
            .unwrap();

        let err = app
            .submit(
                &TaskId::parse("a").unwrap(),
                &AnnotatorId::parse("alice").unwrap(),
                "a red car",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CotalkError::Collaborator(CollaboratorError::NotConfigured(CollaboratorKind::Judge))
        ));

        let err = app
            .transcribe(&TaskId::parse("a").unwrap(), Path::new("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CotalkError::Collaborator(CollaboratorError::NotConfigured(CollaboratorKind::Transcriber))
        ));

        let err = app.export_units(Path::new("units")).await.unwrap_err();
        assert!(matches!(
            err,
            CotalkError::Collaborator(CollaboratorError::NotConfigured(CollaboratorKind::UnitParser))
        ));
    }

    #[tokio::test]
    async fn wired_app_picks_and_submits() {
        let store = memory_store();
        let app = AppBuilder::new(CoordinatorConfig::default())
            .store(store.clone())
            .merger(Arc::new(Concat))
            .judge(Arc::new(Concat))
            .build()
            .unwrap();
        let alice = AnnotatorId::parse("alice").unwrap();

        let handle = app.pick(&alice).await.unwrap().task().cloned().unwrap();
        assert_eq!(app.status().await.unwrap().locked, 1);

        let outcome = app.submit(&handle.task_id, &alice, "a red car").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted { completed: false, .. }));
        assert_eq!(app.status().await.unwrap().unlocked, 1);
        assert_eq!(app.sweep().await.unwrap(), 0);
    }
}
