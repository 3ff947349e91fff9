//! Per-container log file with size-based rotation (spec §6), grounded in
//! the original implementation's single-backup-generation policy: when
//! `container.log` crosses the size threshold, it is renamed to
//! `container.log.1` (clobbering any previous backup) and a fresh file is
//! started.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::store::LOG_FILE;

/// Rotate at 10 MiB, matching the original logger's single-generation policy.
const ROTATE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// An open handle onto a container's log file, appending with optional
/// rotation and timestamp prefixes.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    timestamps: bool,
}

impl LogWriter {
    pub fn open(container_dir: &Path, timestamps: bool) -> Result<Self> {
        let path = container_dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::InvalidInput(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file,
            timestamps,
        })
    }

    /// Return the raw fd this writer holds, so callers can `dup2` it onto a
    /// child's stdout/stderr before `execve`.
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.file.as_raw_fd()
    }

    /// Append one line, rotating first if the file has grown past threshold.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.rotate_if_needed()?;
        let formatted = if self.timestamps {
            format!("{} {line}\n", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f"))
        } else {
            format!("{line}\n")
        };
        self.file
            .write_all(formatted.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("failed to write log line: {e}")))
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        let len = self
            .file
            .metadata()
            .map_err(|e| Error::InvalidInput(format!("failed to stat log file: {e}")))?
            .len();
        if len < ROTATE_THRESHOLD_BYTES {
            return Ok(());
        }
        let backup = self.path.with_extension("log.1");
        debug!(path = %self.path.display(), "rotating container log");
        fs::rename(&self.path, &backup)
            .map_err(|e| Error::InvalidInput(format!("failed to rotate log: {e}")))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::InvalidInput(format!("failed to reopen log: {e}")))?;
        Ok(())
    }
}

/// Every stored line carries a timestamp prefix (`write_line` always adds
/// one); drop it when the caller asked for raw lines. Mirrors the original
/// logger's `line.split(" ", 1)` strip, including its naive "first space"
/// rule with no timestamp-shape validation.
fn strip_timestamp(line: &str) -> &str {
    match line.split_once(' ') {
        Some((_, rest)) => rest,
        None => line,
    }
}

/// Read the tail of a container's log, optionally including the rotated
/// backup generation, and the last `n` lines if `n` is set.
pub fn read_logs(container_dir: &Path, tail: Option<usize>, timestamps: bool) -> Result<String> {
    let backup_path = container_dir.join("container.log.1");
    let main_path = container_dir.join(LOG_FILE);

    let mut lines = Vec::new();
    if backup_path.exists() {
        lines.extend(read_lines(&backup_path)?);
    }
    if main_path.exists() {
        lines.extend(read_lines(&main_path)?);
    }

    let selected: &[String] = match tail {
        Some(n) if n < lines.len() => &lines[lines.len() - n..],
        _ => &lines,
    };

    Ok(selected
        .iter()
        .map(|line| if timestamps { line.as_str() } else { strip_timestamp(line) })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Print existing (tail-limited) log content, then poll the live log file
/// for newly appended lines every 100ms until `out` stops accepting writes
/// (e.g. a closed pipe) or the process is interrupted — mirrors the
/// original logger's `while True: ... time.sleep(0.1)` follow loop.
pub fn follow_logs(
    container_dir: &Path,
    tail: Option<usize>,
    timestamps: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let existing = read_logs(container_dir, tail, timestamps)?;
    if !existing.is_empty() {
        writeln!(out, "{existing}")
            .map_err(|e| Error::InvalidInput(format!("failed to write log output: {e}")))?;
    }

    let main_path = container_dir.join(LOG_FILE);
    let file = File::open(&main_path)
        .map_err(|e| Error::InvalidInput(format!("failed to open {}: {e}", main_path.display())))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::InvalidInput(format!("failed to seek {}: {e}", main_path.display())))?;

    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| Error::InvalidInput(format!("failed to read log line: {e}")))?;
        if n == 0 {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }
        let line = line.trim_end_matches('\n');
        let rendered = if timestamps { line } else { strip_timestamp(line) };
        writeln!(out, "{rendered}")
            .map_err(|e| Error::InvalidInput(format!("failed to write log output: {e}")))?;
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidInput(format!("failed to open {}: {e}", path.display())))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .map_err(|e| Error::InvalidInput(format!("failed to read {}: {e}", path.display())))
}
