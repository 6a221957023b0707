//! App - アプリケーション層
//!
//! ports を組み合わせて coordination のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ワイヤリングと起動時検証
//! - **LeasePicker**: task の割り当て（CAS で lease を取る）
//! - **LeaseReaper / ReaperLoop**: Lease 期限切れの回収
//! - **SubmissionPipeline**: 提出を consensus に畳み込み、完了判定
//! - **ViewRefresh**: lease を手放して取り直す
//! - **init_pool / pool_status / Transcription**: 周辺の操作
//! - **UnitExport**: 完成した consensus を semantic unit に分解して書き出す

pub mod builder;
pub mod picker;
pub mod pool;
pub mod reaper_loop;
pub mod refresh;
pub mod semantic_units;
pub mod status;
pub mod submission;
pub mod transcription;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::picker::LeasePicker;
pub use self::pool::{InitReport, init_pool};
pub use self::reaper_loop::{LeaseReaper, ReaperLoop};
pub use self::refresh::ViewRefresh;
pub use self::semantic_units::{ExportFailure, ExportReport, UnitExport};
pub use self::status::{PoolCounts, pool_status};
pub use self::submission::{SubmissionPipeline, SubmitOutcome};
pub use self::transcription::Transcription;
