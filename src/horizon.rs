//! Horizon grids written as host-importable `.char` files.
//!
//! A `.char` file holds one `inline crossline z` triplet per line. Undefined
//! and non-finite samples are left out.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::debug;

/// Z values at or above this are undefined.
pub const UNDEFINED_Z: f64 = 1e30;

/// An inclusive, stepped range of survey line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: i32,
    pub stop: i32,
    pub step: i32,
}

impl LineRange {
    pub fn new(start: i32, stop: i32, step: i32) -> Self {
        Self { start, stop, step }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.step <= 0 || self.stop < self.start {
            bail!(
                "invalid {what} range {}-{} step {}",
                self.start,
                self.stop,
                self.step
            );
        }
        Ok(())
    }

    fn numbers(&self) -> impl Iterator<Item = i32> + '_ {
        std::iter::successors(Some(self.start), move |n| n.checked_add(self.step))
            .take_while(move |n| *n <= self.stop)
    }
}

/// Write `grid` (one row per inline, one column per crossline) to `out`.
///
/// Rows and columns beyond the ranges, or line numbers beyond the grid, are
/// ignored. Z values are rounded to one decimal. Returns the number of
/// samples written.
pub fn write_horizon<W: Write>(
    out: &mut W,
    grid: &[Vec<f64>],
    inlines: LineRange,
    crosslines: LineRange,
) -> Result<usize> {
    inlines.validate("inline")?;
    crosslines.validate("crossline")?;

    let mut written = 0;
    for (inl, row) in inlines.numbers().zip(grid) {
        for (crl, z) in crosslines.numbers().zip(row) {
            if !(z.is_finite() && *z < UNDEFINED_Z) {
                continue;
            }
            writeln!(out, "{inl} {crl} {z:.1}")?;
            written += 1;
        }
    }
    Ok(written)
}

/// Write `grid` to a new `.char` file in `dir` and return its path.
pub fn create_horizon_file(
    dir: &Path,
    grid: &[Vec<f64>],
    inlines: LineRange,
    crosslines: LineRange,
) -> Result<PathBuf> {
    let (path, file) = new_char_file(dir)?;
    let mut out = BufWriter::new(file);
    let written = write_horizon(&mut out, grid, inlines, crosslines)
        .with_context(|| format!("failed to write horizon file {}", path.display()))?;
    out.flush()
        .with_context(|| format!("failed to flush horizon file {}", path.display()))?;
    debug!(path = %path.display(), samples = written, "horizon file written");
    Ok(path)
}

fn new_char_file(dir: &Path) -> Result<(PathBuf, File)> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    for attempt in 0u32.. {
        let name = match attempt {
            0 => format!("horizon-{stamp}.char"),
            n => format!("horizon-{stamp}-{n}.char"),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to create horizon file {}", path.display())));
            }
        }
    }
    bail!("no free horizon file name in {}", dir.display())
}
