//! cotalk-core
//!
//! 画像アノテーションの協調作業を調停するコア。
//! 複数の annotator が同じ画像プールを並行して回り、
//! 1 枚ごとに提出を consensus に畳み込んで完了まで進める。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, errors, timefmt）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, collaborators）
//! - **app**: アプリケーションロジック（builder, picker, reaper_loop, submission, refresh, など）
//! - **impls**: 実装（FileTaskStore, InMemoryTaskStore, OpenAI adapters）
//! - **config**: CLI / 環境変数 / TOML からの設定解決
//! - **observability**: tracing の初期化
//!
//! All task mutation goes through `TaskStore::cas_update`; at most one
//! annotator holds the lease on a task at any instant.

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
