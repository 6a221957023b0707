//! Coordinator configuration.
//!
//! Resolved once at startup and immutable afterwards. Priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`--config`, or `cotalk.toml` in the working directory)
//! 4. Compiled defaults

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "cotalk.toml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    paths: PathsFileConfig,
    lease: LeaseFileConfig,
    completion: CompletionFileConfig,
    llm: Option<LlmFileConfig>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PathsFileConfig {
    image_dir: Option<PathBuf>,
    task_dir: Option<PathBuf>,
    audio_dir: Option<PathBuf>,
    export_dir: Option<PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LeaseFileConfig {
    timeout_minutes: Option<u64>,
    interval_seconds: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CompletionFileConfig {
    person_num: Option<i64>,
    cas_retries: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct LlmFileConfig {
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    transcription_model: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Global CLI arguments shared by every `cotalk` subcommand.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CliArgs {
    /// Path to config file (default: `./cotalk.toml` if present).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the images to annotate.
    #[arg(long, global = true, env = "COTALK_IMAGE_DIR")]
    pub image_dir: Option<PathBuf>,

    /// Directory holding one JSON record per image.
    #[arg(long, global = true, env = "COTALK_TASK_DIR")]
    pub task_dir: Option<PathBuf>,

    /// Directory where submitted audio is archived.
    #[arg(long, global = true)]
    pub audio_dir: Option<PathBuf>,

    /// Leases older than this many minutes are reclaimed.
    #[arg(long, global = true)]
    pub timeout_minutes: Option<u64>,

    /// Seconds between reaper sweeps.
    #[arg(long, global = true)]
    pub interval_seconds: Option<u64>,

    /// Submissions needed to complete a task. <= 0: only the completeness judge completes.
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub person_num: Option<i64>,

    /// API key for the LLM endpoint (overrides the file).
    #[arg(long, global = true, env = "COTALK_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "COTALK_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Count-based completion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionThreshold(Option<NonZeroU32>);

impl CompletionThreshold {
    /// `n <= 0` disables the count rule. Counts beyond `u32::MAX` are rejected.
    pub fn from_person_num(n: i64) -> Result<Self, ConfigError> {
        if n <= 0 {
            return Ok(Self(None));
        }
        let n = u32::try_from(n)
            .map_err(|_| ConfigError::Invalid(format!("person_num {n} is out of range")))?;
        Ok(Self(NonZeroU32::new(n)))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn get(self) -> Option<u32> {
        self.0.map(NonZeroU32::get)
    }

    pub fn is_reached(self, submissions: usize) -> bool {
        self.0
            .is_some_and(|n| submissions >= n.get() as usize)
    }
}

/// OpenAI-compatible endpoint used by the collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub transcription_model: Option<String>,
}

/// Fully resolved coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub image_dir: PathBuf,
    pub task_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// Where `export-units` writes the record copies with semantic units.
    pub export_dir: PathBuf,
    pub lease_timeout: Duration,
    pub sweep_interval: Duration,
    pub completion: CompletionThreshold,
    /// Attempts per operation when a compare-and-swap loses a race.
    pub cas_retries: u32,
    pub llm: Option<LlmConfig>,
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("data/image"),
            task_dir: PathBuf::from("output/annotation_json"),
            audio_dir: PathBuf::from("output/audio"),
            export_dir: PathBuf::from("output/semantic_units_json"),
            lease_timeout: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(10),
            completion: CompletionThreshold(NonZeroU32::new(2)),
            cas_retries: 5,
            llm: None,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` that does not exist is an error; the default
    /// file may be absent.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    fn resolve(cli: &CliArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lease_timeout = match cli.timeout_minutes.or(file.lease.timeout_minutes) {
            Some(m) => m.checked_mul(60).map(Duration::from_secs).ok_or_else(|| {
                ConfigError::Invalid(format!("timeout_minutes {m} is out of range"))
            })?,
            None => defaults.lease_timeout,
        };
        let sweep_interval = cli
            .interval_seconds
            .or(file.lease.interval_seconds)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        if sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "interval_seconds must be greater than 0".to_string(),
            ));
        }

        let cas_retries = file.completion.cas_retries.unwrap_or(defaults.cas_retries);
        if cas_retries == 0 {
            return Err(ConfigError::Invalid(
                "cas_retries must be greater than 0".to_string(),
            ));
        }

        let completion = match cli.person_num.or(file.completion.person_num) {
            Some(n) => CompletionThreshold::from_person_num(n)?,
            None => defaults.completion,
        };

        let llm = file.llm.map(|llm| LlmConfig {
            api_base: llm.api_base,
            api_key: cli.llm_api_key.clone().or(llm.api_key),
            model: llm.model,
            temperature: llm.temperature,
            transcription_model: llm.transcription_model,
        });

        Ok(Self {
            image_dir: cli
                .image_dir
                .clone()
                .or(file.paths.image_dir)
                .unwrap_or(defaults.image_dir),
            task_dir: cli
                .task_dir
                .clone()
                .or(file.paths.task_dir)
                .unwrap_or(defaults.task_dir),
            audio_dir: cli
                .audio_dir
                .clone()
                .or(file.paths.audio_dir)
                .unwrap_or(defaults.audio_dir),
            export_dir: file.paths.export_dir.unwrap_or(defaults.export_dir),
            lease_timeout,
            sweep_interval,
            completion,
            cas_retries,
            llm,
            log_level: cli.log_level.clone(),
        })
    }
}

/// Load and parse the TOML config file.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(path) = explicit_path {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
