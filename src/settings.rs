//! User settings of the host application.
//!
//! The host keeps per-user settings in `~/.od` (or `DTECT_PERSONAL_DIR`).
//! Files there are "par" files: `key: value` lines, with `!` lines acting as
//! section separators. A `DTECT_USER` suffix selects an alternate profile.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::host::HostEnv;
use crate::install::Platform;

const SETTINGS_FILE: &str = "settings";
const SURVEY_FILE: &str = "survey";
const DATA_ROOT_KEY: &str = "Default DATA directory";

#[derive(Debug, Clone)]
pub struct Settings {
    platform: Platform,
    env: HostEnv,
}

impl Settings {
    pub fn new(platform: Platform, env: HostEnv) -> Self {
        Self { platform, env }
    }

    pub fn from_process() -> Self {
        Self::new(Platform::current(), HostEnv::from_process())
    }

    /// Directory holding the user's host settings.
    pub fn settings_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.env.get("DTECT_PERSONAL_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".od"))
    }

    /// Path of settings file `name`, suffixed with `.<DTECT_USER>` when set.
    pub fn settings_file(&self, name: &str) -> Result<PathBuf> {
        let file = match self.env.get("DTECT_USER") {
            Some(user) => format!("{name}.{user}"),
            None => name.to_string(),
        };
        Ok(self.settings_dir()?.join(file))
    }

    /// Root directory of the user's survey data.
    ///
    /// `DTECT_WINDATA` (Windows only) and `DTECT_DATA` win when they name an
    /// existing directory; otherwise the user settings file is consulted.
    pub fn base_data_dir(&self) -> Result<Option<PathBuf>> {
        let mut env_keys = vec!["DTECT_DATA"];
        if self.platform == Platform::Windows {
            env_keys.insert(0, "DTECT_WINDATA");
        }
        for key in env_keys {
            if let Some(dir) = self.env.get(key).map(PathBuf::from) {
                if dir.is_dir() {
                    debug!(key, dir = %dir.display(), "data root from environment");
                    return Ok(Some(dir));
                }
            }
        }

        let settings = self.settings_file(SETTINGS_FILE)?;
        if !settings.is_file() {
            return Ok(None);
        }
        Ok(read_par_value(&settings, DATA_ROOT_KEY)?.map(PathBuf::from))
    }

    /// Name of the user's current survey directory.
    pub fn survey_name(&self) -> Result<Option<String>> {
        let path = self.settings_file(SURVEY_FILE)?;
        if !path.is_file() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(contents
            .lines()
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string))
    }

    /// Full path of the current survey.
    pub fn data_dir(&self) -> Result<Option<PathBuf>> {
        let (Some(root), Some(survey)) = (self.base_data_dir()?, self.survey_name()?) else {
            return Ok(None);
        };
        Ok(Some(root.join(survey)))
    }
}

/// Value stored under `key` in a par file, if present.
pub fn read_par_value(path: &Path, key: &str) -> Result<Option<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_par_value(&contents, key))
}

fn parse_par_value(contents: &str, key: &str) -> Option<String> {
    contents
        .lines()
        .filter(|line| !line.starts_with('!'))
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().to_string())
}
