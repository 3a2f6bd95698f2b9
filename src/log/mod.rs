//! Process log sinks.
//!
//! Host batch programs and this crate report progress into two named logs:
//! the processing log (task progress, tailed by the monitor) and the system
//! log (general messages). Each is a [`ProcessLog`] pointing at stdout,
//! stderr, or an existing file. Components that write to a log receive it
//! explicitly; nothing swaps process-wide streams.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

/// Where a [`ProcessLog`] sends its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
    /// No sink attached; messages are dropped.
    Detached,
}

impl LogTarget {
    /// Parse a log target as given on a host command line.
    ///
    /// `<stdout>`/`stdout` and `<stderr>`/`stderr` select the standard
    /// streams, an empty string detaches, anything else is a file path.
    pub fn parse(spec: &str) -> Self {
        match spec.trim() {
            "<stdout>" | "stdout" => Self::Stdout,
            "<stderr>" | "stderr" => Self::Stderr,
            "" => Self::Detached,
            path => Self::File(PathBuf::from(path)),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Stdout => "<stdout>".to_string(),
            Self::Stderr => "<stderr>".to_string(),
            Self::File(path) => path.display().to_string(),
            Self::Detached => "(detached)".to_string(),
        }
    }
}

/// A named log sink with an optional file-backed writer.
pub struct ProcessLog {
    name: String,
    target: LogTarget,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl ProcessLog {
    /// Attach a log named `name` to `target`.
    ///
    /// A file target must already exist; a missing file leaves the log
    /// detached and emits a warning, matching how the host treats a stale
    /// `--logfile` argument.
    pub fn open(name: &str, target: LogTarget) -> Result<Self> {
        let log = Self {
            name: name.to_string(),
            target: LogTarget::Detached,
            writer: Mutex::new(None),
        };
        log.attached(target)
    }

    pub fn stdout(name: &str) -> Self {
        Self {
            name: name.to_string(),
            target: LogTarget::Stdout,
            writer: Mutex::new(None),
        }
    }

    /// Point this log at a new target, dropping the previous one.
    pub fn set_target(&mut self, target: LogTarget) -> Result<()> {
        self.flush()?;
        let name = self.name.clone();
        *self = Self::open(&name, target)?;
        Ok(())
    }

    fn attached(mut self, target: LogTarget) -> Result<Self> {
        let target = match target {
            LogTarget::File(path) if !path.is_file() => {
                warn!(log = %self.name, path = %path.display(), "log file not found; log detached");
                LogTarget::Detached
            }
            other => other,
        };
        if let LogTarget::File(path) = &target {
            let file = open_append(path)?;
            self.writer = Mutex::new(Some(BufWriter::new(file)));
        }
        debug!(log = %self.name, target = %target.label(), "log attached");
        self.target = target;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.target, LogTarget::File(_))
    }

    /// Path of the backing file, if any.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.target {
            LogTarget::File(path) => Some(path),
            _ => None,
        }
    }

    /// Write one line to the sink.
    pub fn log_msg(&self, msg: impl Display) -> Result<()> {
        match &self.target {
            LogTarget::Stdout => writeln!(io::stdout().lock(), "{msg}")
                .context("failed to write log line to stdout")?,
            LogTarget::Stderr => writeln!(io::stderr().lock(), "{msg}")
                .context("failed to write log line to stderr")?,
            LogTarget::File(path) => {
                let mut writer = self.lock_writer()?;
                let writer = writer
                    .as_mut()
                    .ok_or_else(|| anyhow!("log {} has no open writer", self.name))?;
                writeln!(writer, "{msg}")
                    .with_context(|| format!("failed to write log {}", path.display()))?;
                writer
                    .flush()
                    .with_context(|| format!("failed to flush log {}", path.display()))?;
            }
            LogTarget::Detached => debug!(log = %self.name, "dropped line on detached log"),
        }
        Ok(())
    }

    /// Write the space-separated `parts` as one line.
    pub fn log_parts(&self, parts: &[&dyn Display]) -> Result<()> {
        self.log_msg(merge_args(parts))
    }

    /// Empty the backing file, keeping its first `keep_lines` lines.
    ///
    /// Does nothing when the log is not file-backed. The append handle is
    /// reopened afterwards so later lines land in the truncated file. Must
    /// not be called while another process is still writing the file.
    pub fn reset(&self, keep_lines: usize) -> Result<()> {
        let LogTarget::File(path) = &self.target else {
            debug!(log = %self.name, "reset skipped; log is not file-backed");
            return Ok(());
        };

        let mut writer = self.lock_writer()?;
        if let Some(mut old) = writer.take() {
            old.flush()
                .with_context(|| format!("failed to flush log {}", path.display()))?;
        }
        reset_retaining_prefix(path, keep_lines)?;
        *writer = Some(BufWriter::new(open_append(path)?));
        Ok(())
    }

    /// Borrow the backing file as a writer for the lifetime of the guard.
    ///
    /// Returns `None` when the log is not file-backed. Other writes to this
    /// log wait until the guard is dropped; dropping flushes.
    pub fn redirect(&self) -> Result<Option<Redirect<'_>>> {
        if !self.is_file_backed() {
            return Ok(None);
        }
        let guard = self.lock_writer()?;
        Ok(Some(Redirect { guard }))
    }

    /// Standard output and error handles for a child process writing to
    /// this log.
    pub fn child_stdio(&self) -> Result<(Stdio, Stdio)> {
        match &self.target {
            LogTarget::File(path) => {
                self.flush()?;
                let out = open_append(path)?;
                let err = out
                    .try_clone()
                    .with_context(|| format!("failed to clone handle for {}", path.display()))?;
                Ok((Stdio::from(out), Stdio::from(err)))
            }
            LogTarget::Stdout | LogTarget::Stderr => Ok((Stdio::inherit(), Stdio::inherit())),
            LogTarget::Detached => Ok((Stdio::null(), Stdio::null())),
        }
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = self.lock_writer()?.as_mut() {
            writer.flush().context("failed to flush log")?;
        }
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Option<BufWriter<File>>>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("log {} writer lock poisoned", self.name))
    }
}

/// Scoped write access to a file-backed [`ProcessLog`].
pub struct Redirect<'a> {
    guard: MutexGuard<'a, Option<BufWriter<File>>>,
}

impl Write for Redirect<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.guard.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("redirected log has no open writer")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Redirect<'_> {
    fn drop(&mut self) {
        if let Some(writer) = self.guard.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "failed to flush redirected log");
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))
}

/// Rewrite `path` so only its first `keep_lines` lines remain.
///
/// Kept lines are preserved byte for byte, terminators included. Lines a
/// writer appends between the read and the rewrite are lost.
pub fn reset_retaining_prefix(path: &Path, keep_lines: usize) -> Result<()> {
    let content =
        std::fs::read(path).with_context(|| format!("failed to read log {}", path.display()))?;

    let cut = if keep_lines == 0 {
        0
    } else {
        content
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .map(|(i, _)| i + 1)
            .nth(keep_lines - 1)
            .unwrap_or(content.len())
    };

    std::fs::write(path, &content[..cut])
        .with_context(|| format!("failed to rewrite log {}", path.display()))?;
    debug!(path = %path.display(), keep_lines, kept_bytes = cut, "log reset");
    Ok(())
}

/// Join message parts with single spaces.
pub fn merge_args(parts: &[&dyn Display]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Current local time in the host's log format, e.g.
/// `Mon 20 Apr 2020, 13:59:54`.
pub fn time_stamp(with_micros: bool, abbreviated: bool) -> String {
    format_time_stamp(&Local::now().naive_local(), with_micros, abbreviated)
}

pub fn format_time_stamp(at: &NaiveDateTime, with_micros: bool, abbreviated: bool) -> String {
    let mut fmt = String::from(if abbreviated { "%a %d %b" } else { "%A %d %B" });
    fmt.push_str(" %Y, %H:%M:%S");
    if with_micros {
        fmt.push_str("%.6f");
    }
    at.format(&fmt).to_string()
}
