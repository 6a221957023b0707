//! Pool initialization - 画像ディレクトリから task を作る

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{StoreError, TaskId, TaskRecord};
use crate::ports::TaskStore;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tiff", "bmp", "gif"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub created: usize,
    pub skipped: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Create one unlocked task per image in `image_dir`. Existing tasks are kept.
pub async fn init_pool(image_dir: &Path, store: &dyn TaskStore) -> Result<InitReport, StoreError> {
    let io_error = |source| StoreError::Io {
        path: image_dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(image_dir).await.map_err(io_error)?;
    let mut images: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        if is_image(&path) && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            images.push(path);
        }
    }
    images.sort();

    let mut report = InitReport::default();
    for path in images {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping image with non UTF-8 name");
            continue;
        };
        let id = match TaskId::from_image_name(file_name) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping image");
                continue;
            }
        };

        if store.insert(TaskRecord::new(id.clone(), file_name)).await? {
            tracing::debug!(task_id = %id, "task created");
            report.created += 1;
        } else {
            report.skipped += 1;
        }
    }

    tracing::info!(created = report.created, skipped = report.skipped, "pool initialized");
    Ok(report)
}
