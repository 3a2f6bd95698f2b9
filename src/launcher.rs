//! Launching host batch programs.
//!
//! [`ProcessLauncher`] is the seam between monitoring and the host: it turns
//! a [`LaunchSpec`] into a running [`BatchJob`] or a finished
//! [`ExecOutput`]. [`HostLauncher`] resolves program names inside the host
//! executables directory and passes the survey arguments through the
//! environment the host expects.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::host::HostArgs;
use crate::install::{InstallResolver, Platform};
use crate::log::ProcessLog;

/// Host program that runs command scripts.
pub const SCRIPT_DRIVER: &str = "od_main";

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program name inside the executables directory, or an absolute path.
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child (key, value pairs).
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run a host command script through the script driver.
    pub fn script(path: &Path) -> Self {
        Self::new(SCRIPT_DRIVER)
            .arg("--cmd")
            .arg(path.display().to_string())
    }
}

/// Captured result of a program run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A spawned host process.
#[derive(Debug)]
pub struct BatchJob {
    program: String,
    child: Child,
}

impl BatchJob {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// True while the process has not exited.
    pub fn is_running(&mut self) -> Result<bool> {
        Ok(self.try_exit_code()?.is_none())
    }

    /// `Some(code)` once the process exited; `Some(None)` when it was killed
    /// by a signal.
    pub fn try_exit_code(&mut self) -> Result<Option<Option<i32>>> {
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("failed to poll {}", self.program))?;
        Ok(status.map(|s| s.code()))
    }

    /// Block until the process exits.
    pub fn wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to wait for {}", self.program))?;
        Ok(status.code())
    }

    pub fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .with_context(|| format!("failed to kill {}", self.program))
    }
}

/// Spawns and runs host programs.
pub trait ProcessLauncher {
    /// Start `spec` in the background with output sent to `log`.
    fn launch(&self, spec: &LaunchSpec, log: &ProcessLog) -> Result<BatchJob>;

    /// Run `spec` to completion and capture its output.
    fn execute(&self, spec: &LaunchSpec) -> Result<ExecOutput>;
}

/// Launcher for programs shipped with the host installation.
#[derive(Debug, Clone)]
pub struct HostLauncher {
    platform: Platform,
    exec_dir: PathBuf,
    software_dir: Option<PathBuf>,
    args: HostArgs,
}

impl HostLauncher {
    /// Build a launcher from resolved host arguments.
    ///
    /// Fails when no executables directory could be determined.
    pub fn new(args: &HostArgs, resolver: &InstallResolver) -> Result<Self> {
        let Some(exec_dir) = args.exec_dir.clone() else {
            bail!(
                "host executables directory not found; set [host] exec_dir, DTECT_APPL, or add the host bin directory to PATH"
            );
        };
        Ok(Self {
            platform: resolver.platform(),
            exec_dir,
            software_dir: resolver.software_dir(),
            args: args.clone(),
        })
    }

    pub fn exec_dir(&self) -> &Path {
        &self.exec_dir
    }

    /// Full path of `program`. Absolute paths are used unchanged.
    pub fn command_path(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.exec_dir.join(self.platform.exe_name(program))
        }
    }

    /// Environment the host programs read their installation and data
    /// locations from.
    pub fn host_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(dir) = &self.software_dir {
            env.push(("DTECT_APPL".to_string(), dir.display().to_string()));
        }
        if let Some(root) = &self.args.data_root {
            env.push(("DTECT_DATA".to_string(), root.display().to_string()));
        }
        env
    }

    fn command(&self, spec: &LaunchSpec) -> Result<Command> {
        let program = self.command_path(&spec.program);
        if !program.is_file() {
            bail!("host program not found: {}", program.display());
        }
        let mut cmd = Command::new(&program);
        cmd.args(&spec.args);
        cmd.envs(self.host_env());
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        debug!(program = %program.display(), args = ?spec.args, "host command prepared");
        Ok(cmd)
    }
}

impl ProcessLauncher for HostLauncher {
    fn launch(&self, spec: &LaunchSpec, log: &ProcessLog) -> Result<BatchJob> {
        let (stdout, stderr) = log.child_stdio()?;
        let child = self
            .command(spec)?
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("failed to launch {}", spec.program))?;
        info!(program = %spec.program, pid = child.id(), log = %log.target().label(), "batch job launched");
        Ok(BatchJob {
            program: spec.program.clone(),
            child,
        })
    }

    fn execute(&self, spec: &LaunchSpec) -> Result<ExecOutput> {
        let output = self
            .command(spec)?
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", spec.program))?;
        Ok(ExecOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostEnv;

    fn launcher(exec_dir: &Path) -> HostLauncher {
        let args = HostArgs {
            exec_dir: Some(exec_dir.to_path_buf()),
            data_root: Some(PathBuf::from("/data/od")),
            ..HostArgs::default()
        };
        let resolver = InstallResolver::new(Platform::Linux, HostEnv::default());
        HostLauncher::new(&args, &resolver).unwrap()
    }

    #[test]
    fn requires_exec_dir() {
        let resolver = InstallResolver::new(Platform::Linux, HostEnv::default());
        let err = HostLauncher::new(&HostArgs::default(), &resolver).unwrap_err();
        assert!(err.to_string().contains("executables directory"));
    }

    #[test]
    fn script_spec_uses_driver() {
        let spec = LaunchSpec::script(Path::new("/tmp/run.cmd"));
        assert_eq!(spec.program, "od_main");
        assert_eq!(spec.args, vec!["--cmd", "/tmp/run.cmd"]);
    }

    #[test]
    fn resolves_program_paths() {
        let launcher = launcher(Path::new("/opt/od/bin/lux64/Release"));
        assert_eq!(
            launcher.command_path("od_main"),
            PathBuf::from("/opt/od/bin/lux64/Release/od_main")
        );
        assert_eq!(launcher.command_path("/bin/sh"), PathBuf::from("/bin/sh"));
    }

    #[test]
    fn host_env_carries_data_root() {
        let launcher = launcher(Path::new("/opt/od/bin/lux64/Release"));
        assert_eq!(
            launcher.host_env(),
            vec![("DTECT_DATA".to_string(), "/data/od".to_string())]
        );
    }

    #[test]
    fn missing_program_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher(tmp.path());
        let err = launcher.execute(&LaunchSpec::new("od_main")).unwrap_err();
        assert!(err.to_string().contains("host program not found"));
    }

    #[cfg(unix)]
    #[test]
    fn execute_captures_output_and_env() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher(tmp.path());
        let spec = LaunchSpec::new("/bin/sh")
            .args(["-c", "echo \"$DTECT_DATA $EXTRA\"; echo oops >&2; exit 3"]);
        let spec = LaunchSpec {
            env: vec![("EXTRA".to_string(), "yes".to_string())],
            ..spec
        };

        let output = launcher.execute(&spec).unwrap();
        assert_eq!(output.stdout.trim(), "/data/od yes");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success);
    }

    #[cfg(unix)]
    #[test]
    fn launch_writes_to_process_log() {
        use crate::log::LogTarget;

        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("proc.log");
        std::fs::write(&log_path, "").unwrap();
        let log = ProcessLog::open("proc", LogTarget::File(log_path.clone())).unwrap();

        let launcher = launcher(tmp.path());
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "echo Finished batch processing"]);
        let mut job = launcher.launch(&spec, &log).unwrap();
        assert_eq!(job.program(), "/bin/sh");
        assert_eq!(job.wait().unwrap(), Some(0));
        assert!(!job.is_running().unwrap());

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content, "Finished batch processing\n");
    }
}
