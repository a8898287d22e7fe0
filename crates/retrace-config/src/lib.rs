//! Configuration for the retrace debugger.
//!
//! A single TOML file with one table per concern. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "RETRACE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value.message().to_owned())
    }
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetraceConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub breakpoints: BreakpointConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl RetraceConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self> {
        let config: RetraceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the effective config: an explicit path wins, then `RETRACE_CONFIG`,
    /// then the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load_from_path(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.replay.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "replay.checkpoint_interval",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.replay.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                key: "replay.max_consecutive_failures",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.evaluation.max_steps == 0 {
            return Err(ConfigError::Invalid {
                key: "evaluation.max_steps",
                message: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file logging is skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter. `RUST_LOG`, when set, is appended to the configured level.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let config_directives = Self::normalize_level_directives(&self.level);
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address `retrace serve` binds when `--listen` is not given.
    #[serde(default = "ServerConfig::default_listen")]
    pub listen: String,
}

impl ServerConfig {
    fn default_listen() -> String {
        "127.0.0.1:6080".to_owned()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    /// Execution points between automatic checkpoints.
    #[serde(default = "ReplayConfig::default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Relaunch a crashed child process while replaying.
    #[serde(default = "ReplayConfig::default_restart_enabled")]
    pub restart_enabled: bool,

    /// Hard cap on child relaunches over the lifetime of one target.
    #[serde(default = "ReplayConfig::default_max_restarts")]
    pub max_restarts: u32,

    /// Failed recoveries in a row (a relaunched child crashing again before a
    /// request succeeds) before the target is torn down.
    #[serde(default = "ReplayConfig::default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl ReplayConfig {
    fn default_checkpoint_interval() -> u64 {
        32
    }

    fn default_restart_enabled() -> bool {
        true
    }

    fn default_max_restarts() -> u32 {
        5
    }

    fn default_max_consecutive_failures() -> u32 {
        2
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Self::default_checkpoint_interval(),
            restart_enabled: Self::default_restart_enabled(),
            max_restarts: Self::default_max_restarts(),
            max_consecutive_failures: Self::default_max_consecutive_failures(),
        }
    }
}

/// What happens when a breakpoint condition throws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionErrorPolicy {
    /// Pause only while pause-on-exceptions is enabled.
    #[default]
    FollowPauseOnExceptions,
    Ignore,
    Pause,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakpointConfig {
    #[serde(default)]
    pub condition_errors: ConditionErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    /// Instruction budget for one evaluation or breakpoint condition.
    #[serde(default = "EvaluationConfig::default_max_steps")]
    pub max_steps: u64,
}

impl EvaluationConfig {
    fn default_max_steps() -> u64 {
        100_000
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_steps: Self::default_max_steps(),
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global tracing subscriber. Only the first call has any effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            let mut options = OpenOptions::new();
            options.create(true).append(true);
            options.open(path).ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(std::io::sink);
        if logging.stderr {
            make_writer = BoxMakeWriter::new(make_writer.and(std::io::stderr));
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Mutex::new(file)));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target: "retrace.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
