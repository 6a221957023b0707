//! `cotalk` - command line front end for the annotation coordinator.
//!
//! # Usage
//!
//! ```bash
//! # 画像ディレクトリから task を作る
//! cotalk init --image-dir data/image
//!
//! # reaper を常駐させる（Ctrl-C で停止）
//! cotalk run
//!
//! # annotator として 1 件取って提出する
//! cotalk pick --annotator alice
//! cotalk submit --task P0008 --annotator alice --text "a red car parked by the gate"
//!
//! # 完成した consensus を semantic unit に分解して書き出す
//! cotalk export-units --save-dir output/semantic_units_json
//! ```
//!
//! Every command prints one JSON document on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cotalk_core::app::{App, AppBuilder};
use cotalk_core::config::{CliArgs, CoordinatorConfig};
use cotalk_core::domain::{AnnotatorId, CollaboratorKind, TaskId};
use cotalk_core::impls::{FileTaskStore, OpenAiChat, OpenAiTranscriber};
use cotalk_core::observability::init_tracing;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "cotalk")]
#[command(about = "Lease-based coordinator for collaborative image annotation")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create one task per image in the image directory.
    Init,
    /// Print task counts by state.
    Status,
    /// Reclaim expired leases once.
    Sweep,
    /// Run the lease reaper until interrupted.
    Run,
    /// Lease a task for an annotator.
    Pick {
        #[arg(long)]
        annotator: AnnotatorId,
    },
    /// Submit an annotation (text, or audio to transcribe) and get the next task.
    Submit {
        #[arg(long)]
        task: TaskId,
        #[arg(long)]
        annotator: AnnotatorId,
        #[arg(long, conflicts_with = "audio", required_unless_present = "audio")]
        text: Option<String>,
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Release the current task (if any) and lease another one.
    Refresh {
        #[arg(long)]
        annotator: AnnotatorId,
        #[arg(long)]
        task: Option<TaskId>,
    },
    /// Parse every consensus into semantic units and write copies of the records.
    ExportUnits {
        /// Output directory (default: `[paths] export_dir`).
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
}

impl Command {
    fn collaborators(&self) -> &'static [CollaboratorKind] {
        match self {
            Command::Submit { audio: Some(_), .. } => &[
                CollaboratorKind::Transcriber,
                CollaboratorKind::Normalizer,
                CollaboratorKind::Merger,
                CollaboratorKind::Judge,
            ],
            Command::Submit { .. } => &[CollaboratorKind::Merger, CollaboratorKind::Judge],
            Command::ExportUnits { .. } => &[CollaboratorKind::UnitParser],
            _ => &[],
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CoordinatorConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    if let Err(e) = run(cli.command, config).await {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: CoordinatorConfig) -> CliResult<()> {
    let app = build_app(&command, config).await?;

    match command {
        Command::Init => print_json(&app.init_pool().await?),
        Command::Status => print_json(&app.status().await?),
        Command::Sweep => {
            let reclaimed = app.sweep().await?;
            print_json(&serde_json::json!({ "reclaimed": reclaimed }))
        }
        Command::Run => {
            let reaper = app.spawn_reaper();
            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupt received, shutting down");
            reaper.shutdown_and_join().await;
            Ok(())
        }
        Command::Pick { annotator } => print_json(&app.pick(&annotator).await?),
        Command::Submit {
            task,
            annotator,
            text,
            audio,
        } => {
            let text = match (text, audio) {
                (Some(text), _) => text,
                (None, Some(audio)) => app.transcribe(&task, &audio).await?,
                (None, None) => String::new(),
            };
            print_json(&app.submit(&task, &annotator, &text).await?)
        }
        Command::Refresh { annotator, task } => {
            print_json(&app.refresh(task.as_ref(), &annotator).await?)
        }
        Command::ExportUnits { save_dir } => {
            let save_dir = save_dir.unwrap_or_else(|| app.config().export_dir.clone());
            print_json(&app.export_units(&save_dir).await?)
        }
    }
}

async fn build_app(command: &Command, config: CoordinatorConfig) -> CliResult<App> {
    let store = Arc::new(FileTaskStore::open(config.task_dir.clone()).await?);
    let mut builder = AppBuilder::new(config.clone()).store(store);

    if let Some(llm) = &config.llm {
        let chat = Arc::new(OpenAiChat::new(llm));
        builder = builder
            .normalizer(chat.clone())
            .merger(chat.clone())
            .judge(chat.clone())
            .unit_parser(chat)
            .transcriber(Arc::new(OpenAiTranscriber::new(llm)));
    }

    Ok(builder.expect_collaborators(command.collaborators()).build()?)
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
