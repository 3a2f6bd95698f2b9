//! Tail reading for live, append-only logs.
//!
//! Batch jobs keep appending to their log while it is being inspected, so the
//! tail is read backward from the end in fixed-size chunks rather than by
//! loading the whole file. Each call sizes the file once and never reads past
//! that size: bytes appended afterwards show up on the next call.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

/// Default backward read step, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default number of trailing lines requested.
pub const DEFAULT_TAIL_LINES: usize = 10;

/// A log could not be opened or read.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to read log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TailError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the log does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
        }
    }
}

/// Parameters for a single tail read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    /// Maximum number of lines returned.
    pub count: usize,
    /// Drop empty and whitespace-only lines from the tail.
    pub strip_blank: bool,
    /// Backward read step in bytes. Zero is treated as one.
    pub chunk_size: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            count: DEFAULT_TAIL_LINES,
            strip_blank: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TailOptions {
    pub fn new(count: usize, strip_blank: bool) -> Self {
        Self {
            count,
            strip_blank,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Read the last `count` lines of `reader`, oldest first.
///
/// The reader's current position is ignored. Line terminators (`\n`, with an
/// optional preceding `\r`) are removed from the returned lines.
pub fn read_tail<R: Read + Seek>(
    reader: &mut R,
    count: usize,
    strip_blank: bool,
) -> io::Result<Vec<String>> {
    read_tail_with(reader, &TailOptions::new(count, strip_blank))
}

/// [`read_tail`] with an explicit chunk size.
///
/// Chunks are read back to front only until the window holds `count`
/// complete lines, so the cost is bounded by the size of those lines plus one
/// chunk. With `strip_blank` the last `count` raw lines are taken first and
/// blank ones removed from them afterwards.
pub fn read_tail_with<R: Read + Seek>(
    reader: &mut R,
    options: &TailOptions,
) -> io::Result<Vec<String>> {
    if options.count == 0 {
        return Ok(Vec::new());
    }

    let chunk = options.chunk_size.max(1) as u64;
    let end = reader.seek(SeekFrom::End(0))?;
    let mut start = end;
    // Newest chunk first.
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut newlines = 0usize;
    let mut ends_with_newline = false;

    while start > 0 {
        // Clamp at byte 0: a step past the beginning means "read from start".
        let step = chunk.min(start);
        start -= step;

        reader.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; step as usize];
        reader.read_exact(&mut buf)?;

        if chunks.is_empty() {
            ends_with_newline = buf.last() == Some(&b'\n');
        }
        newlines += buf.iter().filter(|b| **b == b'\n').count();
        chunks.push(buf);

        // With a partial first segment discarded, every newline but a final
        // one closes a complete line.
        if newlines.saturating_sub(usize::from(ends_with_newline)) >= options.count {
            break;
        }
    }

    let window: Vec<u8> = chunks.into_iter().rev().flatten().collect();
    trace!(
        size = end,
        window = window.len(),
        from_start = start == 0,
        "tail window read"
    );

    let mut lines = split_lines(&window, start == 0);
    if lines.len() > options.count {
        lines.drain(..lines.len() - options.count);
    }
    if options.strip_blank {
        lines.retain(|line| !is_blank(line));
    }
    Ok(lines)
}

/// Open `path` and read its last `count` lines.
pub fn read_tail_path(
    path: &Path,
    count: usize,
    strip_blank: bool,
) -> Result<Vec<String>, TailError> {
    read_tail_path_with(path, &TailOptions::new(count, strip_blank))
}

pub fn read_tail_path_with(path: &Path, options: &TailOptions) -> Result<Vec<String>, TailError> {
    let mut file = File::open(path).map_err(|e| TailError::io(path, e))?;
    read_tail_with(&mut file, options).map_err(|e| TailError::io(path, e))
}

/// True for empty or whitespace-only lines.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Split a byte window into lines.
///
/// When the window does not begin at the start of the file its first segment
/// may be a fragment of a longer line and is dropped.
fn split_lines(window: &[u8], at_file_start: bool) -> Vec<String> {
    let mut segments: Vec<&[u8]> = window.split(|b| *b == b'\n').collect();
    if segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    if !at_file_start && !segments.is_empty() {
        segments.remove(0);
    }

    segments
        .into_iter()
        .map(|segment| {
            let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
            String::from_utf8_lossy(segment).into_owned()
        })
        .collect()
}
