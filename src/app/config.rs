use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::worker::supervisor::DEFAULT_SHELL;

pub const CONFIG_FILE: &str = "task-supervisor.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory holding one JSON file per task.
    pub tasks_dir: PathBuf,
    /// Execution log, appended to on every normal command exit.
    pub log_path: PathBuf,
    /// How long a stopped command may ignore SIGTERM before it is killed.
    pub stop_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Program that runs task commands as `<shell> -c <command>`.
    pub shell: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            log_path: PathBuf::from("tasks.log"),
            stop_timeout_ms: 5_000,
            poll_interval_ms: 20,
            shell: DEFAULT_SHELL.to_owned(),
        }
    }
}

impl Config {
    /// Reads `task-supervisor.json` from `dir`, or falls back to defaults
    /// when there is no such file.
    pub fn load_from(dir: &Path) -> Result<Config, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Config::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
