//! Shared collaborator doubles for the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cotalk_core::app::{App, AppBuilder};
use cotalk_core::config::{CompletionThreshold, CoordinatorConfig};
use cotalk_core::domain::{AnnotatorId, CollaboratorError, TaskId};
use cotalk_core::ports::{Clock, CompletenessJudge, Merger, TaskStore};

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn annotator(id: &str) -> AnnotatorId {
    AnnotatorId::parse(id).unwrap()
}

pub fn task_id(id: &str) -> TaskId {
    TaskId::parse(id).unwrap()
}

/// Write empty image files into `dir`.
pub fn images(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::write(dir.join(name), b"").unwrap();
    }
}

/// Completes on "none", merges by joining with "; ".
/// An optional delay widens the window between read and write.
#[derive(Default)]
pub struct ScriptedCollaborators {
    pub delay: Option<Duration>,
    pub merges: AtomicUsize,
    pub judgements: AtomicUsize,
}

impl ScriptedCollaborators {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl CompletenessJudge for ScriptedCollaborators {
    async fn is_complete(&self, input: &str) -> Result<bool, CollaboratorError> {
        self.judgements.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(input.eq_ignore_ascii_case("none"))
    }
}

#[async_trait]
impl Merger for ScriptedCollaborators {
    async fn merge(&self, consensus: &str, input: &str) -> Result<String, CollaboratorError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(format!("{consensus}; {input}"))
    }
}

pub fn config(image_dir: &Path, task_dir: &Path, person_num: i64) -> CoordinatorConfig {
    CoordinatorConfig {
        image_dir: image_dir.to_path_buf(),
        task_dir: task_dir.to_path_buf(),
        audio_dir: task_dir.join("audio"),
        completion: CompletionThreshold::from_person_num(person_num).unwrap(),
        cas_retries: 10,
        ..CoordinatorConfig::default()
    }
}

pub fn app(
    config: CoordinatorConfig,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    collaborators: Arc<ScriptedCollaborators>,
) -> App {
    AppBuilder::new(config)
        .store(store)
        .clock(clock)
        .merger(collaborators.clone())
        .judge(collaborators)
        .build()
        .unwrap()
}
