use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::install::BuildConfig;
use crate::monitor::COMPLETION_MARKER;
use crate::tail::{DEFAULT_CHUNK_SIZE, DEFAULT_TAIL_LINES};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".batchmon";

/// Overrides for locating the host installation and project data.
///
/// Every field is optional; unset fields fall back to the environment and
/// then to the user's host settings (see [`crate::host::HostArgs::resolve`]).
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostConfig {
    /// Directory holding the host executables (e.g. `.../bin/lux64/Release`).
    #[serde(default)]
    pub exec_dir: Option<PathBuf>,
    /// Survey data root.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    /// Survey directory name under the data root.
    #[serde(default)]
    pub survey: Option<String>,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Lines printed by `batchmon tail`. Completion checks always look at the
    /// last ten lines.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Backward read step for every tail read, completion checks included.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// No deadline when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_marker() -> String {
    COMPLETION_MARKER.to_string()
}

fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_poll_interval_millis() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            tail_lines: default_tail_lines(),
            chunk_size: default_chunk_size(),
            poll_interval_millis: default_poll_interval_millis(),
            timeout_secs: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Log targets as accepted by [`crate::log::LogTarget::parse`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_proc_log")]
    pub proc_log: String,
    #[serde(default = "default_sys_log")]
    pub sys_log: String,
}

fn default_proc_log() -> String {
    "<stdout>".to_string()
}

fn default_sys_log() -> String {
    "<stdout>".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            proc_log: default_proc_log(),
            sys_log: default_sys_log(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, PartialEq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.batchmon/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
