//! Transcription - 音声入力をテキストにする
//!
//! 音声は `audio_dir/<task_id>/audio_<YYYYmmdd_HHMMSS>.<ext>` に保存してから
//! Transcriber → Normalizer の順に通す。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{CotalkError, TaskId};
use crate::ports::{Clock, Normalizer, Transcriber};

pub struct Transcription {
    transcriber: Arc<dyn Transcriber>,
    normalizer: Arc<dyn Normalizer>,
    clock: Arc<dyn Clock>,
    audio_dir: PathBuf,
}

impl Transcription {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        normalizer: Arc<dyn Normalizer>,
        clock: Arc<dyn Clock>,
        audio_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transcriber,
            normalizer,
            clock,
            audio_dir: audio_dir.into(),
        }
    }

    /// Archive `audio` under the task and return the normalized transcript.
    /// An empty path means "no recording" and yields an empty string.
    pub async fn transcribe(&self, task_id: &TaskId, audio: &Path) -> Result<String, CotalkError> {
        if audio.as_os_str().is_empty() {
            return Ok(String::new());
        }

        let archived = self.archive(task_id, audio).await?;
        let raw = self.transcriber.transcribe(&archived).await?;
        tracing::debug!(task_id = %task_id, raw = %raw, "audio transcribed");
        let clean = self.normalizer.normalize(&raw).await?;
        Ok(clean)
    }

    async fn archive(&self, task_id: &TaskId, audio: &Path) -> Result<PathBuf, CotalkError> {
        let dir = self.audio_dir.join(task_id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CotalkError::Audio {
                path: dir.clone(),
                source,
            })?;

        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let ext = audio
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav");
        let target = dir.join(format!("audio_{stamp}.{ext}"));

        tokio::fs::copy(audio, &target)
            .await
            .map_err(|source| CotalkError::Audio {
                path: audio.to_path_buf(),
                source,
            })?;
        tracing::info!(task_id = %task_id, path = %target.display(), "audio archived");
        Ok(target)
    }
}
