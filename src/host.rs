//! Typed host arguments.
//!
//! Host batch programs take the executables directory, survey data root,
//! survey name and log files as arguments. [`HostArgs`] gathers them from,
//! in order of precedence: explicit configuration, the environment, and the
//! user's host settings.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::config::HostConfig;
use crate::install::InstallResolver;
use crate::log::ProcessLog;
use crate::settings::Settings;

/// Snapshot of environment variables consulted by host lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnv {
    vars: HashMap<String, String>,
}

impl HostEnv {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Value of `key`, treating an empty value as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// `PATH` split into its entries.
    pub fn path_entries(&self) -> Vec<PathBuf> {
        self.get("PATH")
            .map(|path| std::env::split_paths(path).collect())
            .unwrap_or_default()
    }
}

/// Arguments passed to host batch programs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostArgs {
    pub exec_dir: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
    pub survey: Option<String>,
    pub proc_log: Option<PathBuf>,
    pub sys_log: Option<PathBuf>,
}

impl HostArgs {
    /// Fill every field from `config`, then the installation resolver and
    /// user settings for anything the config leaves unset.
    pub fn resolve(
        config: &HostConfig,
        resolver: &InstallResolver,
        settings: &Settings,
    ) -> Result<Self> {
        let exec_dir = match &config.exec_dir {
            Some(dir) => Some(dir.clone()),
            None => resolver.exec_dir(config.build),
        };
        let data_root = match &config.data_root {
            Some(dir) => Some(dir.clone()),
            None => settings.base_data_dir()?,
        };
        let survey = match &config.survey {
            Some(name) => Some(name.clone()),
            None => settings.survey_name()?,
        };

        let args = Self {
            exec_dir,
            data_root,
            survey,
            proc_log: None,
            sys_log: None,
        };
        debug!(?args, "host arguments resolved");
        Ok(args)
    }

    /// Record the files behind the processing and system logs.
    pub fn with_logs(mut self, proc_log: &ProcessLog, sys_log: &ProcessLog) -> Self {
        self.proc_log = proc_log.file_path().map(PathBuf::from);
        self.sys_log = sys_log.file_path().map(PathBuf::from);
        self
    }

    /// Full path of the current survey, when both parts are known.
    pub fn survey_dir(&self) -> Option<PathBuf> {
        Some(self.data_root.as_ref()?.join(self.survey.as_ref()?))
    }

    /// Command-line arguments understood by host batch programs.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(root) = &self.data_root {
            args.push("--dataroot".to_string());
            args.push(root.display().to_string());
        }
        if let Some(survey) = &self.survey {
            args.push("--survey".to_string());
            args.push(survey.clone());
        }
        args
    }
}
