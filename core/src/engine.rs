use std::{
  ffi::OsStr,
  fs,
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  cursor::{decode_cursor, encode_cursor, Cursor},
  index::{IndexCache, LineIndex, DEFAULT_GRANULARITY},
  lines::{self, LineChunk},
  listing::{self, system_time_ns},
  models::{LinePage, LogFileInfo},
};

#[derive(Debug, Error)]
pub enum LogError {
  #[error("log file not found: {0}")]
  NotFound(String),
  #[error("logs directory not found: {0}")]
  LogsDirMissing(PathBuf),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("bad cursor token: {0}")]
  BadCursor(String),
  #[error("invalid argument: {0}")]
  InvalidArg(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogOptions {
  /// Directory whose regular files are served.
  pub logs_dir: PathBuf,
  /// Lines between recorded index checkpoints.
  pub granularity: usize,
  /// Window size used when a caller asks for 0 lines.
  pub default_num_lines: usize,
  /// Largest window a caller may ask for; larger requests are rejected. `None` means
  /// no limit.
  pub max_num_lines: Option<usize>,
  /// Hold a per-file lock while checking and rebuilding its index.
  pub serialize_rebuilds: bool,
}

impl Default for LogOptions {
  fn default() -> Self {
    Self {
      logs_dir: PathBuf::from("build_log_examples"),
      granularity: DEFAULT_GRANULARITY,
      default_num_lines: 100,
      max_num_lines: None,
      serialize_rebuilds: true,
    }
  }
}

impl LogOptions {
  /// Parse options from JSON; omitted fields keep their defaults.
  pub fn from_json_str(s: &str) -> Result<Self, LogError> {
    serde_json::from_str(s).map_err(|e| LogError::InvalidArg(e.to_string()))
  }

  fn validate(&self) -> Result<(), LogError> {
    if self.granularity == 0 {
      return Err(LogError::InvalidArg("granularity must be at least 1".into()));
    }
    if self.max_num_lines == Some(0) {
      return Err(LogError::InvalidArg("max_num_lines must be at least 1".into()));
    }
    Ok(())
  }
}

/// Read access to the logs directory.
///
/// Cheap to clone; clones share one [`IndexCache`].
#[derive(Clone)]
pub struct LogService {
  options: LogOptions,
  cache: IndexCache,
}

impl LogService {
  pub fn new(options: LogOptions) -> Result<Self, LogError> {
    Self::with_cache(options, IndexCache::new())
  }

  /// Build a service around an existing cache, e.g. one shared with other services or
  /// wrapped by an external eviction policy.
  pub fn with_cache(options: LogOptions, cache: IndexCache) -> Result<Self, LogError> {
    options.validate()?;
    Ok(Self { options, cache })
  }

  pub fn options(&self) -> &LogOptions {
    &self.options
  }

  pub fn cache(&self) -> &IndexCache {
    &self.cache
  }

  /// Regular files in the logs directory with size and mtime, sorted by filename.
  pub fn list_files(&self) -> Result<Vec<LogFileInfo>, LogError> {
    listing::list_files(&self.options.logs_dir)
  }

  /// Current index for `filename`, rebuilt first if the file changed since the last scan.
  pub fn get_index(&self, filename: &str) -> Result<Arc<LineIndex>, LogError> {
    let path = self.resolve_path(filename)?;
    self.index_at(filename, &path)
  }

  /// Total lines in `filename`, including an unterminated last line.
  pub fn line_count(&self, filename: &str) -> Result<u64, LogError> {
    Ok(self.get_index(filename)?.line_count())
  }

  /// Byte offset of the first byte of 1-based `target_line`.
  ///
  /// Lines `<= 0` map to offset 0. Lines past the end of the file map to the file length.
  pub fn resolve_offset(&self, filename: &str, target_line: i64) -> Result<u64, LogError> {
    let path = self.resolve_path(filename)?;
    if target_line <= 0 {
      return Ok(0);
    }
    let index = self.index_at(filename, &path)?;
    let (_, offset) = lines::open_at_line(&path, &index, target_line as u64)?;
    debug!(file = filename, line = target_line, offset, "resolved line offset");
    Ok(offset)
  }

  /// Lazily read up to `num_lines` lines of `filename` starting at `start_line`.
  ///
  /// `start_line <= 0` reads from line 1. `num_lines == 0` uses the configured default.
  /// Fails with [`LogError::NotFound`] before touching the index if the file does not
  /// exist, and with [`LogError::InvalidArg`] if `num_lines` exceeds `max_num_lines`.
  pub fn read_lines(
    &self,
    filename: &str,
    start_line: i64,
    num_lines: usize,
  ) -> Result<LineChunk, LogError> {
    let path = self.resolve_path(filename)?;
    let num_lines = self.window(num_lines)?;
    let start_line = start_line.max(1) as u64;
    let index = self.index_at(filename, &path)?;
    let (reader, offset) = lines::open_at_line(&path, &index, start_line)?;
    debug!(file = filename, start_line, offset, num_lines, "opened line window");
    Ok(LineChunk::new(reader, start_line, offset, num_lines))
  }

  /// Read one window eagerly and hand back a cursor for the next one.
  ///
  /// A cursor issued for the current version of the file resumes at its stored byte
  /// offset directly; one issued before the file changed is re-resolved from its line
  /// number through the index. A cursor is issued at end-of-file too, so a client
  /// following a growing log picks up appended lines with it.
  pub fn read_page(
    &self,
    filename: &str,
    cursor: Option<&str>,
    num_lines: usize,
  ) -> Result<LinePage, LogError> {
    let path = self.resolve_path(filename)?;
    let num_lines = self.window(num_lines)?;
    let cursor = decode_cursor(cursor)?;
    let mtime = fs::metadata(&path)?.modified()?;
    let mtime_ns = system_time_ns(mtime);

    let mut chunk = match cursor {
      Some(c) if c.mtime_ns == mtime_ns => {
        let reader = lines::open_at_offset(&path, c.offset)?;
        LineChunk::new(reader, c.line, c.offset, num_lines)
      }
      Some(c) => {
        warn!(file = filename, line = c.line, "cursor predates file change, re-resolving");
        self.read_lines(filename, c.line as i64, num_lines)?
      }
      None => self.read_lines(filename, 1, num_lines)?,
    };

    let lines = chunk.by_ref().collect::<Result<Vec<_>, _>>()?;
    let reached_eof = chunk.at_eof()?;
    let start_line = chunk.start_line();
    let next_cursor = encode_cursor(Cursor {
      line: start_line + lines.len() as u64,
      offset: chunk.offset(),
      mtime_ns,
    });
    Ok(LinePage {
      start_line,
      lines,
      next_cursor,
      reached_eof,
    })
  }

  fn index_at(&self, filename: &str, path: &Path) -> Result<Arc<LineIndex>, LogError> {
    self.cache.get_or_build(
      filename,
      path,
      self.options.granularity,
      self.options.serialize_rebuilds,
    )
  }

  fn window(&self, num_lines: usize) -> Result<usize, LogError> {
    let n = if num_lines == 0 {
      self.options.default_num_lines.max(1)
    } else {
      num_lines
    };
    match self.options.max_num_lines {
      Some(max) if n > max => Err(LogError::InvalidArg(format!(
        "num_lines {} exceeds max_num_lines {}",
        n, max
      ))),
      _ => Ok(n),
    }
  }

  /// Map `filename` to an existing regular file directly under the logs directory.
  fn resolve_path(&self, filename: &str) -> Result<PathBuf, LogError> {
    let not_found = || LogError::NotFound(filename.to_string());
    // Rejects "", "..", separators and anything else that is not a bare file name.
    if Path::new(filename).file_name() != Some(OsStr::new(filename)) {
      return Err(not_found());
    }
    let path = self.options.logs_dir.join(filename);
    match fs::metadata(&path) {
      Ok(meta) if meta.is_file() => Ok(path),
      Ok(_) => Err(not_found()),
      Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
      Err(e) => Err(e.into()),
    }
  }
}
