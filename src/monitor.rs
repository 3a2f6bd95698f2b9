//! Batch-job completion monitoring.
//!
//! A host batch program announces completion by writing a marker line to its
//! log. [`is_job_complete`] is a point-in-time check of the log tail; callers
//! poll it on their own cadence, or use [`JobWatch`] to do so with a deadline.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::tail::{DEFAULT_CHUNK_SIZE, TailError, TailOptions, read_tail_path_with};

/// Line written by host batch programs when they finish.
pub const COMPLETION_MARKER: &str = "Finished batch processing";

/// Number of trailing lines inspected for the marker.
pub const COMPLETION_TAIL_LINES: usize = 10;

/// True if the last non-blank line among the final ten lines of `path`
/// contains `marker`.
///
/// A missing log reads as "not complete": the job may not have created it
/// yet. Any other read failure is returned as an error.
pub fn is_job_complete(path: &Path, marker: &str) -> Result<bool, TailError> {
    is_job_complete_with(path, marker, DEFAULT_CHUNK_SIZE)
}

/// [`is_job_complete`] reading the tail in `chunk_size` byte steps.
pub fn is_job_complete_with(
    path: &Path,
    marker: &str,
    chunk_size: usize,
) -> Result<bool, TailError> {
    let options = TailOptions::new(COMPLETION_TAIL_LINES, true).with_chunk_size(chunk_size);
    let lines = match read_tail_path_with(path, &options) {
        Ok(lines) => lines,
        Err(e) if e.is_not_found() => {
            debug!(path = %path.display(), "log not created yet");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    Ok(lines.last().is_some_and(|line| line.contains(marker)))
}

/// True if any line of the log mentions an error (case-insensitive).
pub fn has_error(path: &Path) -> Result<bool> {
    let file =
        File::open(path).with_context(|| format!("failed to open log {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed to read log {}", path.display()))?;
        if n == 0 {
            return Ok(false);
        }
        if String::from_utf8_lossy(&buf).to_lowercase().contains("error") {
            return Ok(true);
        }
    }
}

/// Lifecycle of one monitored batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    TimedOut,
}

/// Inputs that move a [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Spawned,
    MarkerSeen,
    DeadlineElapsed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }

    /// Apply `event`. Returns false and leaves the state unchanged when the
    /// transition is not allowed.
    pub fn advance(&mut self, event: JobEvent) -> bool {
        let next = match (*self, event) {
            (Self::Pending, JobEvent::Spawned) => Self::Running,
            (Self::Running, JobEvent::MarkerSeen) => Self::Completed,
            (Self::Running, JobEvent::DeadlineElapsed) => Self::TimedOut,
            _ => return false,
        };
        *self = next;
        true
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
        }
    }
}

/// Polls one job log until it completes or a deadline passes.
#[derive(Debug)]
pub struct JobWatch {
    path: PathBuf,
    marker: String,
    poll_interval: Duration,
    chunk_size: usize,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    state: JobState,
    log_seen: bool,
}

impl JobWatch {
    pub fn new(path: &Path, marker: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            marker: marker.to_string(),
            poll_interval: Duration::from_secs(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
            deadline: None,
            state: JobState::Pending,
            log_seen: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Give up after `timeout`, counted from [`JobWatch::started`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark the job as spawned and start the deadline clock.
    pub fn started(&mut self) {
        if self.state.advance(JobEvent::Spawned) {
            self.deadline = self.timeout.map(|t| Instant::now() + t);
            debug!(path = %self.path.display(), "job watch started");
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log file has existed at any poll so far.
    ///
    /// A running watch whose log was never seen points at a job that never
    /// started writing, rather than one still in progress.
    pub fn log_seen(&self) -> bool {
        self.log_seen
    }

    /// Check the log once and update the state.
    pub fn poll(&mut self) -> Result<JobState, TailError> {
        if self.state != JobState::Running {
            return Ok(self.state);
        }

        if !self.log_seen && self.path.exists() {
            self.log_seen = true;
        }

        if is_job_complete_with(&self.path, &self.marker, self.chunk_size)? {
            self.state.advance(JobEvent::MarkerSeen);
            info!(path = %self.path.display(), "batch job finished");
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.state.advance(JobEvent::DeadlineElapsed);
            info!(
                path = %self.path.display(),
                log_seen = self.log_seen,
                "batch job timed out"
            );
        }
        Ok(self.state)
    }

    /// Poll until the job reaches a terminal state or `stop` is raised.
    ///
    /// Returns the state at exit; a raised `stop` leaves it `Running`.
    pub fn wait(&mut self, stop: &AtomicBool) -> Result<JobState, TailError> {
        loop {
            let state = self.poll()?;
            if state.is_terminal() || state == JobState::Pending {
                return Ok(state);
            }
            if stop.load(Ordering::Relaxed) {
                debug!(path = %self.path.display(), "job watch stopped");
                return Ok(state);
            }
            std::thread::sleep(self.next_sleep());
        }
    }

    fn next_sleep(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn log_with(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("batch.log");
        fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn single_marker_line_is_complete() {
        let (_tmp, path) = log_with("Finished batch processing");
        assert!(is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn trailing_blank_lines_are_ignored() {
        let (_tmp, path) = log_with("Finished batch processing\n\n\n\n");
        assert!(is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn lines_without_marker_are_not_complete() {
        let (_tmp, path) = log_with("Starting\nReading\nProcessing\n50%\n100%\n");
        assert!(!is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn missing_log_is_not_complete() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_job_complete(&tmp.path().join("never.log"), COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn empty_log_is_not_complete() {
        let (_tmp, path) = log_with("");
        assert!(!is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn unreadable_log_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(is_job_complete(tmp.path(), COMPLETION_MARKER).is_err());
    }

    #[test]
    fn marker_must_be_on_last_non_blank_line() {
        let (_tmp, path) = log_with("Finished batch processing\nCleaning up\n");
        assert!(!is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn marker_is_matched_as_substring() {
        let (_tmp, path) = log_with(
            "Mon 20 Apr 2020, 13:59:54 Finished batch processing (total time 12 s)\n",
        );
        assert!(is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn marker_pushed_out_by_blank_lines_is_not_complete() {
        let mut content = String::from("Finished batch processing\n");
        content.push_str(&"\n".repeat(12));
        let (_tmp, path) = log_with(&content);
        assert!(!is_job_complete(&path, COMPLETION_MARKER).unwrap());

        let mut content = String::from("Finished batch processing\n");
        content.push_str(&"   \n".repeat(9));
        let (_tmp, path) = log_with(&content);
        assert!(is_job_complete(&path, COMPLETION_MARKER).unwrap());
    }

    #[test]
    fn chunk_size_does_not_change_completion() {
        let mut content = String::from("Starting\nFinished batch processing\n");
        content.push_str(&"  \n".repeat(4));
        let (_tmp, path) = log_with(&content);
        for chunk in [0, 1, 3, 4096] {
            assert!(is_job_complete_with(&path, COMPLETION_MARKER, chunk).unwrap());
        }

        let mut watch = JobWatch::new(&path, COMPLETION_MARKER).with_chunk_size(2);
        watch.started();
        assert_eq!(watch.poll().unwrap(), JobState::Completed);
    }

    #[test]
    fn detects_error_lines() {
        let (_tmp, path) = log_with("Starting\nERROR: cannot open cube\nFinished batch processing\n");
        assert!(has_error(&path).unwrap());
        let (_tmp2, clean) = log_with("Starting\nFinished batch processing\n");
        assert!(!has_error(&clean).unwrap());
    }

    #[test]
    fn has_error_on_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(has_error(&tmp.path().join("none.log")).is_err());
    }

    #[test]
    fn state_transitions() {
        let mut state = JobState::Pending;
        assert!(!state.advance(JobEvent::MarkerSeen));
        assert_eq!(state, JobState::Pending);
        assert!(state.advance(JobEvent::Spawned));
        assert_eq!(state, JobState::Running);
        assert!(state.advance(JobEvent::MarkerSeen));
        assert_eq!(state, JobState::Completed);
        assert!(state.is_terminal());

        for event in [JobEvent::Spawned, JobEvent::MarkerSeen, JobEvent::DeadlineElapsed] {
            assert!(!state.advance(event));
            assert_eq!(state, JobState::Completed);
        }

        let mut state = JobState::Running;
        assert!(state.advance(JobEvent::DeadlineElapsed));
        assert_eq!(state, JobState::TimedOut);
        assert!(!state.advance(JobEvent::MarkerSeen));
        assert_eq!(state.label(), "timed-out");
    }

    #[test]
    fn pending_watch_does_not_poll() {
        let (_tmp, path) = log_with("Finished batch processing\n");
        let mut watch = JobWatch::new(&path, COMPLETION_MARKER);
        assert_eq!(watch.poll().unwrap(), JobState::Pending);
        assert!(!watch.log_seen());
    }

    #[test]
    fn watch_completes_when_marker_appears() {
        let (_tmp, path) = log_with("Starting\n");
        let mut watch = JobWatch::new(&path, COMPLETION_MARKER);
        watch.started();

        assert_eq!(watch.poll().unwrap(), JobState::Running);
        assert!(watch.log_seen());

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Finished batch processing").unwrap();
        file.flush().unwrap();

        assert_eq!(watch.poll().unwrap(), JobState::Completed);
        assert_eq!(watch.poll().unwrap(), JobState::Completed);
    }

    #[test]
    fn watch_times_out_without_log() {
        let tmp = tempfile::tempdir().unwrap();
        let mut watch = JobWatch::new(&tmp.path().join("missing.log"), COMPLETION_MARKER)
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Some(Duration::from_millis(30)));
        watch.started();

        let stop = AtomicBool::new(false);
        assert_eq!(watch.wait(&stop).unwrap(), JobState::TimedOut);
        assert!(!watch.log_seen());
    }

    #[test]
    fn wait_returns_when_stopped() {
        let (_tmp, path) = log_with("still going\n");
        let mut watch = JobWatch::new(&path, COMPLETION_MARKER)
            .with_poll_interval(Duration::from_millis(5));
        watch.started();

        let stop = AtomicBool::new(true);
        assert_eq!(watch.wait(&stop).unwrap(), JobState::Running);
    }

    #[test]
    fn wait_sees_marker_written_by_another_thread() {
        let (_tmp, path) = log_with("Starting\n");
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let mut file = fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            writeln!(file, "Finished batch processing").unwrap();
        });

        let mut watch = JobWatch::new(&path, COMPLETION_MARKER)
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Some(Duration::from_secs(10)));
        watch.started();
        let stop = AtomicBool::new(false);
        assert_eq!(watch.wait(&stop).unwrap(), JobState::Completed);
        writer.join().unwrap();
    }
}
