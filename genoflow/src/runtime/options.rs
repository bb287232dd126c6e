//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use genoflow_shared::constants::{DEFAULT_MAX_WORKERS, env};
use genoflow_shared::errors::{GenoflowError, GenoflowResult};

/// What to do when a non-final stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep going; downstream stages see it in
    /// `upstream_errors`.
    #[default]
    Continue,
    /// Fail the workflow after the first group containing a failure.
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = GenoflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(Self::Continue),
            "fail_fast" => Ok(Self::FailFast),
            other => Err(GenoflowError::Config(format!(
                "unknown failure policy '{}'",
                other
            ))),
        }
    }
}

/// Where workflow state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// `<home>/db/genoflow.db`.
    #[default]
    Sqlite,
    /// In-process only; nothing survives a restart.
    Memory,
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".genoflow"))
        .unwrap_or_else(|| std::env::temp_dir().join("genoflow"))
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// Configuration options for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorOptions {
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
    #[serde(default = "default_true")]
    pub enable_parallel_execution: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub persistence: Persistence,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            enable_parallel_execution: true,
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout_secs: None,
            failure_policy: FailurePolicy::default(),
            persistence: Persistence::default(),
        }
    }
}

impl OrchestratorOptions {
    /// Options rooted at `home_dir`, everything else default.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Self::default()
        }
    }

    /// Load options the way the CLI does.
    ///
    /// The file named by `GENOFLOW_CONFIG` wins, then `<home>/config.json`
    /// (home from `GENOFLOW_HOME` or the default), then built-in defaults.
    /// Environment overrides are applied on top and the result is sanitized.
    pub fn load() -> GenoflowResult<Self> {
        let vars = |key: &str| std::env::var(key).ok();

        let home_hint = vars(env::HOME)
            .map(PathBuf::from)
            .unwrap_or_else(default_home_dir);
        let explicit = vars(env::CONFIG).map(PathBuf::from);

        let mut options = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let implicit = home_hint.join("config.json");
                if implicit.is_file() {
                    Self::from_file(&implicit)?
                } else {
                    Self::default()
                }
            }
        };

        options.apply_overrides(vars)?;
        options.sanitize()?;
        Ok(options)
    }

    /// Parse a JSON options file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> GenoflowResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GenoflowError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| GenoflowError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Apply `GENOFLOW_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GenoflowResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(env::HOME) {
            self.home_dir = PathBuf::from(home);
        }
        if let Some(raw) = lookup(env::MAX_WORKERS) {
            self.max_workers = raw.trim().parse().map_err(|_| {
                GenoflowError::Config(format!("{} must be an integer, got '{}'", env::MAX_WORKERS, raw))
            })?;
        }
        if let Some(raw) = lookup(env::PARALLEL) {
            self.enable_parallel_execution = parse_bool(&raw).ok_or_else(|| {
                GenoflowError::Config(format!("{} must be a boolean, got '{}'", env::PARALLEL, raw))
            })?;
        }
        if let Some(raw) = lookup(env::TASK_TIMEOUT_SECS) {
            self.task_timeout_secs = Some(raw.trim().parse().map_err(|_| {
                GenoflowError::Config(format!(
                    "{} must be an integer, got '{}'",
                    env::TASK_TIMEOUT_SECS,
                    raw
                ))
            })?);
        }
        if let Some(raw) = lookup(env::FAILURE_POLICY) {
            self.failure_policy = raw.parse()?;
        }
        Ok(())
    }

    /// Validate options before any setup work.
    pub fn sanitize(&self) -> GenoflowResult<()> {
        if self.max_workers == 0 {
            return Err(GenoflowError::Config("max_workers must be at least 1".into()));
        }
        if self.max_workers > Semaphore::MAX_PERMITS {
            return Err(GenoflowError::Config(format!(
                "max_workers must be at most {}, got: {}",
                Semaphore::MAX_PERMITS,
                self.max_workers
            )));
        }
        if !self.home_dir.is_absolute() {
            return Err(GenoflowError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(GenoflowError::Config(
                "task_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
