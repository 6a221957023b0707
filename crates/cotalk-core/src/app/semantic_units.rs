//! UnitExport - consensus を semantic unit に分解して書き出す
//!
//! # フロー
//! 1. TaskStore::scan() で全 task を取得（task id 順に処理）
//! 2. consensus が空の task は skip
//! 3. UnitParser::refine() → UnitParser::parse_units()
//! 4. 保存形式の record に `semantic_units` を足して `<save_dir>/<task_id>.json` に書く
//!
//! 正本（task_dir）には書き込まない。1 件の失敗は他の task の export を止めず、
//! ExportReport の `failed` に残る。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{CotalkError, SemanticUnit, TaskId, TaskRecord};
use crate::impls::stored_document;
use crate::ports::{TaskStore, UnitParser};

/// Summary of one export run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub total: usize,
    pub exported: usize,
    /// Tasks with no consensus yet.
    pub skipped: Vec<TaskId>,
    pub failed: Vec<ExportFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFailure {
    pub task_id: TaskId,
    pub error: String,
}

pub struct UnitExport {
    store: Arc<dyn TaskStore>,
    parser: Arc<dyn UnitParser>,
}

impl UnitExport {
    pub fn new(store: Arc<dyn TaskStore>, parser: Arc<dyn UnitParser>) -> Self {
        Self { store, parser }
    }

    pub async fn export(&self, save_dir: &Path) -> Result<ExportReport, CotalkError> {
        tokio::fs::create_dir_all(save_dir)
            .await
            .map_err(|source| CotalkError::Export {
                path: save_dir.to_path_buf(),
                source,
            })?;

        let all = |_: &TaskRecord| true;
        let mut records = self.store.scan(&all).await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut report = ExportReport {
            total: records.len(),
            ..ExportReport::default()
        };
        for record in records {
            if record.consensus_text.trim().is_empty() {
                tracing::info!(task_id = %record.id, "no consensus yet, skipped");
                report.skipped.push(record.id);
                continue;
            }
            match self.export_one(&record, save_dir).await {
                Ok(path) => {
                    tracing::debug!(task_id = %record.id, path = %path.display(), "semantic units written");
                    report.exported += 1;
                }
                Err(e) => {
                    tracing::warn!(task_id = %record.id, error = %e, "semantic unit export failed");
                    report.failed.push(ExportFailure {
                        task_id: record.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            total = report.total,
            exported = report.exported,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "semantic unit export finished"
        );
        Ok(report)
    }

    async fn export_one(&self, record: &TaskRecord, save_dir: &Path) -> Result<PathBuf, CotalkError> {
        let units = self.units_for(record.consensus_text.trim()).await?;

        let path = save_dir.join(format!("{}.json", record.id));
        let io_error = |source: std::io::Error| CotalkError::Export {
            path: path.clone(),
            source,
        };
        let mut document = stored_document(record).map_err(|e| io_error(e.into()))?;
        let units = serde_json::to_value(&units).map_err(|e| io_error(e.into()))?;
        if let Some(fields) = document.as_object_mut() {
            fields.insert("semantic_units".to_string(), units);
        }
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| io_error(e.into()))?;
        tokio::fs::write(&path, bytes).await.map_err(io_error)?;
        Ok(path)
    }

    async fn units_for(&self, caption: &str) -> Result<Vec<SemanticUnit>, CotalkError> {
        let refined = self.parser.refine(caption).await?;
        // 空の refine 結果は元の caption で続ける
        let refined = if refined.trim().is_empty() {
            caption
        } else {
            refined.as_str()
        };
        Ok(self.parser.parse_units(refined).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnnotatorId, CollaboratorError, CollaboratorKind};
    use crate::impls::InMemoryTaskStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Upper-cases on refine, one unit per "; "-separated phrase on parse.
    /// Fails to parse anything containing `fail_on`.
    #[derive(Default)]
    struct PhraseParser {
        fail_on: Option<&'static str>,
        parsed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UnitParser for PhraseParser {
        async fn refine(&self, caption: &str) -> Result<String, CollaboratorError> {
            Ok(caption.to_uppercase())
        }

        async fn parse_units(&self, caption: &str) -> Result<Vec<SemanticUnit>, CollaboratorError> {
            self.parsed.lock().unwrap().push(caption.to_string());
            if self.fail_on.is_some_and(|needle| caption.contains(needle)) {
                return Err(CollaboratorError::Unparseable {
                    kind: CollaboratorKind::UnitParser,
                    reply: "sorry".to_string(),
                });
            }
            Ok(caption
                .split("; ")
                .map(|phrase| SemanticUnit {
                    name: phrase.to_string(),
                    attributes: BTreeMap::new(),
                })
                .collect())
        }
    }

    fn task(id: &str, consensus: &str) -> TaskRecord {
        let mut t = TaskRecord::new(TaskId::parse(id).unwrap(), format!("{id}.png"));
        if !consensus.is_empty() {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
            t.record_submission(AnnotatorId::parse("alice").unwrap(), consensus, at);
            t.push_consensus(consensus.to_string(), at);
            t.mark_completed();
        }
        t
    }

    #[tokio::test]
    async fn writes_units_next_to_a_copy_of_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryTaskStore::with_records([
            task("b", "a red car; a gate"),
            task("a", "a tree"),
            task("empty", ""),
        ]));
        let parser = Arc::new(PhraseParser::default());
        let export = UnitExport::new(store.clone(), parser.clone());

        let report = export.export(dir.path()).await.unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.exported, 2);
        assert_eq!(report.skipped, vec![TaskId::parse("empty").unwrap()]);
        assert!(report.failed.is_empty());
        // refined text is what gets parsed, in task id order
        assert_eq!(*parser.parsed.lock().unwrap(), vec!["A TREE", "A RED CAR; A GATE"]);

        let raw = std::fs::read_to_string(dir.path().join("b.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["overall_annotation"], "a red car; a gate");
        assert_eq!(json["annotation_completed"], "Yes");
        assert_eq!(json["semantic_units"][1]["name"], "A GATE");
        assert!(!dir.path().join("empty.json").exists());

        // the task records themselves are not touched
        let stored = store.get(&TaskId::parse("b").unwrap()).await.unwrap();
        assert_eq!(stored, task("b", "a red car; a gate"));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryTaskStore::with_records([
            task("a", "a tree"),
            task("b", "a broken caption"),
            task("c", "a car"),
        ]));
        let parser = Arc::new(PhraseParser {
            fail_on: Some("BROKEN"),
            ..PhraseParser::default()
        });

        let report = UnitExport::new(store, parser).export(dir.path()).await.unwrap();

        assert_eq!(report.exported, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].task_id.as_str(), "b");
        assert!(report.failed[0].error.contains("semantic unit parser"));
        assert!(dir.path().join("a.json").exists());
        assert!(!dir.path().join("b.json").exists());
        assert!(dir.path().join("c.json").exists());
    }

    #[tokio::test]
    async fn save_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("nested").join("units");
        let store = Arc::new(InMemoryTaskStore::with_records([task("a", "a tree")]));

        let report = UnitExport::new(store, Arc::new(PhraseParser::default()))
            .export(&save_dir)
            .await
            .unwrap();

        assert_eq!(report.exported, 1);
        assert!(save_dir.join("a.json").exists());
    }
}
