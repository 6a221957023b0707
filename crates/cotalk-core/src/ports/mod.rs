//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! coordination ロジック（app）はこの trait だけに依存し、
//! 保存媒体や LLM の実装は impls 側で差し替えます。

pub mod clock;
pub mod collaborators;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::collaborators::{CompletenessJudge, Merger, Normalizer, Transcriber, UnitParser};
pub use self::task_store::{Mutator, Predicate, TaskStore};
