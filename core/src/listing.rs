use std::{
  fs,
  io::ErrorKind,
  path::Path,
  time::{SystemTime, UNIX_EPOCH},
};

use tracing::debug;

use crate::{engine::LogError, models::LogFileInfo};

/// Regular files directly under `dir`, sorted by filename.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<LogFileInfo>, LogError> {
  if !dir.is_dir() {
    return Err(LogError::LogsDirMissing(dir.to_path_buf()));
  }

  let mut files = Vec::new();
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    // Follows symlinks so a linked log still lists as a file.
    let meta = match fs::metadata(entry.path()) {
      Ok(m) => m,
      // removed between read_dir and stat
      Err(e) if e.kind() == ErrorKind::NotFound => continue,
      Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
      continue;
    }
    let filename = entry.file_name().to_string_lossy().into_owned();
    files.push(LogFileInfo {
      name: display_name(&filename),
      size: meta.len(),
      modified_ms: system_time_ms(meta.modified()?),
      filename,
    });
  }
  files.sort_by(|a, b| a.filename.cmp(&b.filename));
  debug!(dir = %dir.display(), count = files.len(), "listed log files");
  Ok(files)
}

/// `build_log_2024_03_20.log` -> `Build Log 2024 03 20`
pub(crate) fn display_name(filename: &str) -> String {
  let stem = Path::new(filename)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(filename);
  stem
    .replace('_', " ")
    .split_whitespace()
    .map(capitalize)
    .collect::<Vec<_>>()
    .join(" ")
}

fn capitalize(word: &str) -> String {
  let mut chars = word.chars();
  match chars.next() {
    None => String::new(),
    Some(first) => first
      .to_uppercase()
      .chain(chars.flat_map(char::to_lowercase))
      .collect(),
  }
}

pub(crate) fn system_time_ms(t: SystemTime) -> i64 {
  match t.duration_since(UNIX_EPOCH) {
    Ok(d) => d.as_millis() as i64,
    Err(e) => -(e.duration().as_millis() as i64),
  }
}

pub(crate) fn system_time_ns(t: SystemTime) -> u64 {
  t.duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_names() {
    assert_eq!(display_name("build_log_2024_03_20.log"), "Build Log 2024 03 20");
    assert_eq!(display_name("NIGHTLY__release.txt"), "Nightly Release");
    assert_eq!(display_name("archive.tar.gz"), "Archive.tar");
    assert_eq!(display_name("noext"), "Noext");
    assert_eq!(display_name(".hidden"), ".hidden");
  }

  #[test]
  fn times_before_epoch_are_negative() {
    let t = UNIX_EPOCH - std::time::Duration::from_millis(1_500);
    assert_eq!(system_time_ms(t), -1_500);
    assert_eq!(system_time_ns(t), 0);
  }
}
