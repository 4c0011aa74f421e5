use std::{
  collections::HashMap,
  fs::File,
  io::{BufRead, BufReader},
  path::Path,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  time::{Instant, SystemTime},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{engine::LogError, models::CacheStats};

/// Lines between two recorded checkpoints unless configured otherwise.
pub const DEFAULT_GRANULARITY: usize = 100;

const SCAN_BUF_BYTES: usize = 64 * 1024;

/// Sparse table of line-start byte offsets for one version of a file.
///
/// `offsets[0]` is always 0; `offsets[k]` is the offset of the first byte of line
/// `k * granularity + 1` (1-based). The table only describes the file as it was when
/// its mtime equalled `observed_mtime`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
  offsets: Vec<u64>,
  granularity: usize,
  observed_mtime: SystemTime,
  byte_len: u64,
  line_count: u64,
}

impl LineIndex {
  pub fn offsets(&self) -> &[u64] {
    &self.offsets
  }

  pub fn granularity(&self) -> usize {
    self.granularity
  }

  pub fn observed_mtime(&self) -> SystemTime {
    self.observed_mtime
  }

  /// Bytes seen by the scan that built this index.
  pub fn byte_len(&self) -> u64 {
    self.byte_len
  }

  /// Number of lines, counting a trailing line without a terminator.
  pub fn line_count(&self) -> u64 {
    self.line_count
  }

  pub fn is_fresh(&self, mtime: SystemTime) -> bool {
    self.observed_mtime == mtime
  }

  /// Nearest checkpoint at or before 1-based `target_line`, as
  /// `(byte offset, whole lines still to skip from there)`.
  ///
  /// Targets past the last checkpoint start from the last one and may ask to skip
  /// beyond the end of the file; the caller's skip simply runs out at EOF.
  pub fn checkpoint_for(&self, target_line: u64) -> (u64, u64) {
    let target = target_line.saturating_sub(1);
    let granularity = self.granularity as u64;
    let bucket = target / granularity;
    let last = (self.offsets.len() - 1) as u64;
    if bucket <= last {
      (self.offsets[bucket as usize], target % granularity)
    } else {
      (self.offsets[last as usize], target - last * granularity)
    }
  }
}

/// Scan `path` from byte 0 and record the start of every `granularity`-th line.
///
/// Counts raw `\n` bytes, so undecodable content never affects the result.
pub fn build_line_index(path: &Path, granularity: usize) -> Result<LineIndex, LogError> {
  if granularity == 0 {
    return Err(LogError::InvalidArg("granularity must be at least 1".into()));
  }
  let started = Instant::now();
  let file = File::open(path)?;
  // Taken before the scan: a write that lands mid-scan bumps the mtime and forces
  // another rebuild on the next lookup.
  let observed_mtime = file.metadata()?.modified()?;
  let mut reader = BufReader::with_capacity(SCAN_BUF_BYTES, file);

  let step = granularity as u64;
  let mut offsets = vec![0u64];
  let mut pos: u64 = 0;
  let mut terminated: u64 = 0;
  let mut partial_tail = false;

  loop {
    let buf = reader.fill_buf()?;
    if buf.is_empty() {
      break;
    }
    let len = buf.len();
    for nl in memchr::memchr_iter(b'\n', buf) {
      terminated += 1;
      if terminated % step == 0 {
        offsets.push(pos + nl as u64 + 1);
      }
    }
    partial_tail = buf[len - 1] != b'\n';
    reader.consume(len);
    pos += len as u64;
  }

  let index = LineIndex {
    offsets,
    granularity,
    observed_mtime,
    byte_len: pos,
    line_count: terminated + u64::from(partial_tail),
  };
  info!(
    file = %path.display(),
    lines = index.line_count,
    checkpoints = index.offsets.len(),
    bytes = index.byte_len,
    elapsed_ms = started.elapsed().as_millis() as u64,
    "built line index"
  );
  Ok(index)
}

type Slot = Arc<Mutex<Option<Arc<LineIndex>>>>;

#[derive(Default)]
struct CacheInner {
  slots: Mutex<HashMap<String, Slot>>,
  hits: AtomicU64,
  builds: AtomicU64,
}

/// Process-wide map from filename to its current [`LineIndex`].
///
/// Starts empty and grows by one entry per distinct filename; entries are replaced on
/// rebuild and only removed through [`IndexCache::invalidate`] or [`IndexCache::clear`].
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct IndexCache {
  inner: Arc<CacheInner>,
}

impl IndexCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cached index for `key`, fresh or not.
  pub fn get(&self, key: &str) -> Option<Arc<LineIndex>> {
    let slot = self.inner.slots.lock().get(key).cloned()?;
    let cached = slot.lock().clone();
    cached
  }

  /// Drop the entry for `key`. Returns whether one existed.
  pub fn invalidate(&self, key: &str) -> bool {
    self.inner.slots.lock().remove(key).is_some()
  }

  pub fn clear(&self) {
    self.inner.slots.lock().clear();
  }

  /// Number of filenames with a built index.
  pub fn len(&self) -> usize {
    let slots: Vec<Slot> = self.inner.slots.lock().values().cloned().collect();
    slots.iter().filter(|s| s.lock().is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      entries: self.len(),
      hits: self.inner.hits.load(Ordering::Relaxed),
      builds: self.inner.builds.load(Ordering::Relaxed),
    }
  }

  /// Return the index for `key` if its mtime still matches `path`, else rescan.
  ///
  /// With `serialize` set, the per-key slot stays locked for the whole check-and-build
  /// so concurrent callers on one stale file share a single scan. Without it, callers
  /// may scan redundantly and the last writer wins.
  pub(crate) fn get_or_build(
    &self,
    key: &str,
    path: &Path,
    granularity: usize,
    serialize: bool,
  ) -> Result<Arc<LineIndex>, LogError> {
    let slot = self.slot(key);
    if serialize {
      let mut guard = slot.lock();
      let mtime = std::fs::metadata(path)?.modified()?;
      if let Some(index) = self.fresh(key, guard.as_ref(), mtime, granularity) {
        return Ok(index);
      }
      let index = self.rebuild(key, path, granularity, guard.is_some())?;
      *guard = Some(Arc::clone(&index));
      Ok(index)
    } else {
      let mtime = std::fs::metadata(path)?.modified()?;
      let cached = slot.lock().clone();
      if let Some(index) = self.fresh(key, cached.as_ref(), mtime, granularity) {
        return Ok(index);
      }
      let index = self.rebuild(key, path, granularity, cached.is_some())?;
      *slot.lock() = Some(Arc::clone(&index));
      Ok(index)
    }
  }

  fn slot(&self, key: &str) -> Slot {
    let mut slots = self.inner.slots.lock();
    Arc::clone(slots.entry(key.to_string()).or_default())
  }

  fn fresh(
    &self,
    key: &str,
    cached: Option<&Arc<LineIndex>>,
    mtime: SystemTime,
    granularity: usize,
  ) -> Option<Arc<LineIndex>> {
    let index = cached?;
    if index.is_fresh(mtime) && index.granularity == granularity {
      self.inner.hits.fetch_add(1, Ordering::Relaxed);
      debug!(file = key, "line index cache hit");
      Some(Arc::clone(index))
    } else {
      None
    }
  }

  fn rebuild(
    &self,
    key: &str,
    path: &Path,
    granularity: usize,
    had_entry: bool,
  ) -> Result<Arc<LineIndex>, LogError> {
    if had_entry {
      warn!(file = key, "line index stale, rebuilding");
    }
    let index = build_line_index(path, granularity)?;
    self.inner.builds.fetch_add(1, Ordering::Relaxed);
    Ok(Arc::new(index))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn numbered(n: usize) -> String {
    (1..=n).map(|i| format!("line {i}\n")).collect()
  }

  fn index_of(content: &[u8], granularity: usize) -> (tempfile::TempDir, LineIndex) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    std::fs::write(&path, content).unwrap();
    let index = build_line_index(&path, granularity).unwrap();
    (dir, index)
  }

  fn line_start(content: &str, line: usize) -> u64 {
    content
      .split_inclusive('\n')
      .take(line - 1)
      .map(|l| l.len() as u64)
      .sum()
  }

  #[test]
  fn checkpoints_every_granularity_lines() {
    let content = numbered(250);
    let (_dir, index) = index_of(content.as_bytes(), 100);
    assert_eq!(
      index.offsets(),
      &[0, line_start(&content, 101), line_start(&content, 201)]
    );
    assert_eq!(index.line_count(), 250);
    assert_eq!(index.byte_len(), content.len() as u64);
  }

  #[test]
  fn checkpoint_for_inside_and_past_recorded_range() {
    let content = numbered(250);
    let (_dir, index) = index_of(content.as_bytes(), 100);
    assert_eq!(index.checkpoint_for(150), (index.offsets()[1], 49));
    assert_eq!(index.checkpoint_for(1), (0, 0));
    assert_eq!(index.checkpoint_for(100), (0, 99));
    assert_eq!(index.checkpoint_for(201), (index.offsets()[2], 0));
    // bucket 4 is past the last checkpoint (k = 2)
    assert_eq!(index.checkpoint_for(450), (index.offsets()[2], 449 - 200));
  }

  #[test]
  fn exact_multiple_records_end_of_file() {
    let content = numbered(200);
    let (_dir, index) = index_of(content.as_bytes(), 100);
    assert_eq!(index.offsets().len(), 3);
    assert_eq!(index.offsets()[2], content.len() as u64);
  }

  #[test]
  fn counts_unterminated_tail_and_ignores_encoding() {
    let mut bytes = b"ok\n".to_vec();
    bytes.extend_from_slice(&[0xff, 0xfe, b'\n', 0xc3]);
    let (_dir, index) = index_of(&bytes, 1);
    assert_eq!(index.line_count(), 3);
    assert_eq!(index.offsets(), &[0, 3, 6]);
  }

  #[test]
  fn empty_file_has_single_checkpoint() {
    let (_dir, index) = index_of(b"", 100);
    assert_eq!(index.offsets(), &[0]);
    assert_eq!(index.line_count(), 0);
  }

  #[test]
  fn zero_granularity_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    std::fs::write(&path, "x\n").unwrap();
    assert!(matches!(
      build_line_index(&path, 0),
      Err(LogError::InvalidArg(_))
    ));
  }

  #[test]
  fn cache_invalidate_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    std::fs::write(&path, numbered(5)).unwrap();

    let cache = IndexCache::new();
    assert!(cache.is_empty());
    cache.get_or_build("a.log", &path, 2, true).unwrap();
    cache.get_or_build("a.log", &path, 2, false).unwrap();
    assert_eq!(
      cache.stats(),
      CacheStats {
        entries: 1,
        hits: 1,
        builds: 1
      }
    );
    assert!(cache.get("a.log").is_some());
    assert!(cache.invalidate("a.log"));
    assert!(!cache.invalidate("a.log"));
    assert!(cache.get("a.log").is_none());

    cache.get_or_build("a.log", &path, 2, true).unwrap();
    cache.clear();
    assert_eq!(cache.len(), 0);
  }
}
