use serde::{Deserialize, Serialize};

/// One entry of the logs directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogFileInfo {
  /// Display form of `filename`, e.g. `Build Log 2024 03 20`.
  pub name: String,
  pub filename: String,
  pub size: u64,
  pub modified_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinePage {
  /// 1-based line number of `lines[0]`.
  pub start_line: u64,
  pub lines: Vec<String>,
  /// Resume token; at end-of-file it points past the last line read.
  pub next_cursor: String,
  pub reached_eof: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub hits: u64,
  pub builds: u64,
}
