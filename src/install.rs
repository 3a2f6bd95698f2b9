//! Host installation discovery.
//!
//! Resolves the software root of an OpendTect installation and the
//! platform-specific directories beneath it. Lookup order for the root:
//!
//! 1. an explicit executables directory (walking up to find the root)
//! 2. the directory of the running `batchmon` binary, when it is installed
//!    inside the host application
//! 3. `DTECT_APPL`
//! 4. `PATH` entries ending in a host executables directory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::HostEnv;

const RELINFO_DIR: &str = "relinfo";
const PROBE_PROGRAM: &str = "od_FileBrowser";
const BIND_LIBRARY: &str = "ODBind";
const SEARCH_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    Mac,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Mac
        } else {
            Self::Linux
        }
    }

    /// Executable file name for `base` on this platform.
    pub fn exe_name(self, base: &str) -> String {
        match self {
            Self::Windows => format!("{base}.exe"),
            Self::Linux | Self::Mac => base.to_string(),
        }
    }

    /// Executables directory relative to the software root.
    fn exec_subdir(self, build: BuildConfig) -> PathBuf {
        let debug = build == BuildConfig::Debug;
        match self {
            Self::Windows => plf_dir("win64", debug),
            Self::Linux => plf_dir("lux64", debug),
            Self::Mac if debug => Path::new("MacOS").join("Debug"),
            Self::Mac => PathBuf::from("MacOS"),
        }
    }

    /// Directory holding the binding library relative to the software root.
    fn lib_subdir(self, build: BuildConfig) -> PathBuf {
        match self {
            Self::Mac if build == BuildConfig::Debug => Path::new("Frameworks").join("Debug"),
            Self::Mac => PathBuf::from("Frameworks"),
            Self::Windows | Self::Linux => self.exec_subdir(build),
        }
    }

    fn library_file(self, base: &str) -> String {
        match self {
            Self::Windows => format!("{base}.dll"),
            Self::Linux => format!("lib{base}.so"),
            Self::Mac => format!("lib{base}.dylib"),
        }
    }
}

fn plf_dir(plf: &str, debug: bool) -> PathBuf {
    Path::new("bin")
        .join(plf)
        .join(if debug { "Debug" } else { "Release" })
}

/// Which build of the host to look for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildConfig {
    /// Release, falling back to Debug.
    #[default]
    Auto,
    Release,
    Debug,
}

impl BuildConfig {
    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Release => "release",
            Self::Debug => "debug",
        }
    }
}

/// True if `dir` looks like the root of a host installation.
pub fn is_possible_software_dir(dir: &Path, platform: Platform) -> bool {
    match platform {
        Platform::Mac => dir.join("Resources").join(RELINFO_DIR).is_dir(),
        Platform::Windows | Platform::Linux => dir.join(RELINFO_DIR).is_dir(),
    }
}

/// Resolves installation paths for one platform and environment.
#[derive(Debug, Clone)]
pub struct InstallResolver {
    platform: Platform,
    env: HostEnv,
    exec_override: Option<PathBuf>,
    self_exe: Option<PathBuf>,
}

impl InstallResolver {
    pub fn new(platform: Platform, env: HostEnv) -> Self {
        Self {
            platform,
            env,
            exec_override: None,
            self_exe: None,
        }
    }

    /// Resolver for the running process: current platform, process
    /// environment and executable location.
    pub fn from_process() -> Self {
        let mut resolver = Self::new(Platform::current(), HostEnv::from_process());
        resolver.self_exe = std::env::current_exe().ok();
        resolver
    }

    /// Use `dir` as the executables directory instead of searching.
    pub fn with_exec_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.exec_override = dir;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }

    /// Root directory of the host installation.
    pub fn software_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = self
            .exec_override
            .as_deref()
            .and_then(|exec| self.find_root_above(exec, SEARCH_DEPTH))
        {
            debug!(dir = %dir.display(), "software dir from executables override");
            return Some(dir);
        }

        if let Some(dir) = self
            .self_exe
            .as_deref()
            .and_then(Path::parent)
            .and_then(|bin| self.find_root_above(bin, SEARCH_DEPTH - 1))
        {
            debug!(dir = %dir.display(), "software dir from own location");
            return Some(dir);
        }

        if let Some(appl) = self.env.get("DTECT_APPL") {
            debug!(dir = appl, "software dir from DTECT_APPL");
            return Some(PathBuf::from(appl));
        }

        self.find_on_path()
    }

    fn find_root_above(&self, start: &Path, depth: usize) -> Option<PathBuf> {
        start
            .ancestors()
            .take(depth)
            .find(|dir| is_possible_software_dir(dir, self.platform))
            .map(Path::to_path_buf)
    }

    fn find_on_path(&self) -> Option<PathBuf> {
        let suffixes = [
            self.platform.exec_subdir(BuildConfig::Release),
            self.platform.exec_subdir(BuildConfig::Debug),
        ];
        let found = self
            .env
            .path_entries()
            .into_iter()
            .filter(|entry| suffixes.iter().any(|suffix| entry.ends_with(suffix)))
            .find_map(|entry| self.find_root_above(&entry, SEARCH_DEPTH));
        if let Some(dir) = &found {
            debug!(dir = %dir.display(), "software dir from PATH");
        }
        found
    }

    /// Directory holding the host executables.
    ///
    /// An explicit override is returned as-is. Otherwise the build is
    /// detected by probing for a known executable under the software root.
    pub fn exec_dir(&self, build: BuildConfig) -> Option<PathBuf> {
        if let Some(dir) = &self.exec_override {
            return Some(dir.clone());
        }
        match build {
            BuildConfig::Auto => self
                .exec_dir(BuildConfig::Release)
                .or_else(|| self.exec_dir(BuildConfig::Debug)),
            _ => {
                let subdir = self.platform.exec_subdir(build);
                let probes = build_variants(build, PROBE_PROGRAM)
                    .into_iter()
                    .map(|name| subdir.join(self.platform.exe_name(&name)))
                    .collect::<Vec<_>>();
                self.probe(&probes)
                    .and_then(|found| found.parent().map(Path::to_path_buf))
            }
        }
    }

    /// Full path of the native database binding library.
    pub fn bind_library(&self, build: BuildConfig) -> Option<PathBuf> {
        match build {
            BuildConfig::Auto => self
                .bind_library(BuildConfig::Release)
                .or_else(|| self.bind_library(BuildConfig::Debug)),
            _ => {
                let subdir = self.platform.lib_subdir(build);
                let probes = build_variants(build, BIND_LIBRARY)
                    .into_iter()
                    .map(|name| subdir.join(self.platform.library_file(&name)))
                    .collect::<Vec<_>>();
                self.probe(&probes)
            }
        }
    }

    /// Directory holding the host shared libraries.
    pub fn lib_dir(&self, build: BuildConfig) -> Option<PathBuf> {
        self.bind_library(build)
            .and_then(|lib| lib.parent().map(Path::to_path_buf))
    }

    /// Path of a bundled icon, if the installation ships it.
    pub fn icon_path(&self, name: &str) -> Option<PathBuf> {
        let path = self
            .software_dir()?
            .join("data")
            .join("icons.Default")
            .join(format!("{name}.png"));
        path.is_file().then_some(path)
    }

    fn probe(&self, relative: &[PathBuf]) -> Option<PathBuf> {
        let root = self.software_dir()?;
        relative
            .iter()
            .map(|rel| root.join(rel))
            .find(|full| full.is_file())
    }
}

/// File base names to try for `build`: debug builds may carry a `d` suffix.
fn build_variants(build: BuildConfig, base: &str) -> Vec<String> {
    match build {
        BuildConfig::Debug => vec![format!("{base}d"), base.to_string()],
        BuildConfig::Release | BuildConfig::Auto => vec![base.to_string()],
    }
}
