use std::{
  fs::File,
  io::{self, BufRead, BufReader, Seek, SeekFrom},
  iter::FusedIterator,
  path::Path,
};

use crate::{engine::LogError, index::LineIndex};

/// Open `path` positioned at byte `offset`.
pub(crate) fn open_at_offset(path: &Path, offset: u64) -> Result<BufReader<File>, LogError> {
  let mut file = File::open(path)?;
  file.seek(SeekFrom::Start(offset))?;
  Ok(BufReader::new(file))
}

/// Open `path` positioned at the first byte of 1-based `target_line`, using the nearest
/// checkpoint in `index` and scanning forward from there.
///
/// Returns the reader together with its byte position. If the file ends first, the
/// position is end-of-file.
pub(crate) fn open_at_line(
  path: &Path,
  index: &LineIndex,
  target_line: u64,
) -> Result<(BufReader<File>, u64), LogError> {
  let (start, skip) = index.checkpoint_for(target_line);
  let mut reader = open_at_offset(path, start)?;
  let skipped = skip_lines(&mut reader, skip)?;
  Ok((reader, start + skipped))
}

/// Consume `count` whole lines from `reader` and return how many bytes that took.
/// Stops early at EOF.
pub(crate) fn skip_lines<R: BufRead>(reader: &mut R, mut count: u64) -> io::Result<u64> {
  let mut consumed: u64 = 0;
  while count > 0 {
    let buf = reader.fill_buf()?;
    if buf.is_empty() {
      break;
    }
    let mut take = buf.len();
    for nl in memchr::memchr_iter(b'\n', buf) {
      count -= 1;
      if count == 0 {
        take = nl + 1;
        break;
      }
    }
    reader.consume(take);
    consumed += take as u64;
  }
  Ok(consumed)
}

/// A bounded, single-pass window of lines read lazily from an open file.
///
/// Each item is one line including its terminator (the last line of a file may have
/// none). Invalid UTF-8 is replaced with U+FFFD. The file handle is released when the
/// window hits EOF or an error, or when the value is dropped, whichever comes first.
#[derive(Debug)]
pub struct LineChunk {
  reader: Option<BufReader<File>>,
  remaining: usize,
  start_line: u64,
  start_offset: u64,
  offset: u64,
  buf: Vec<u8>,
}

impl LineChunk {
  pub(crate) fn new(reader: BufReader<File>, start_line: u64, offset: u64, num_lines: usize) -> Self {
    Self {
      reader: Some(reader),
      remaining: num_lines,
      start_line,
      start_offset: offset,
      offset,
      buf: Vec::new(),
    }
  }

  /// 1-based line number of the first item.
  pub fn start_line(&self) -> u64 {
    self.start_line
  }

  pub fn start_offset(&self) -> u64 {
    self.start_offset
  }

  /// Byte offset of the next line that would be produced.
  pub fn offset(&self) -> u64 {
    self.offset
  }

  /// Lines the window may still produce.
  pub fn remaining(&self) -> usize {
    if self.reader.is_some() {
      self.remaining
    } else {
      0
    }
  }

  /// Whether the underlying file has no bytes left past the current position.
  pub fn at_eof(&mut self) -> Result<bool, LogError> {
    match self.reader.as_mut() {
      None => Ok(true),
      Some(reader) => Ok(reader.fill_buf()?.is_empty()),
    }
  }
}

impl Iterator for LineChunk {
  type Item = Result<String, LogError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    let reader = self.reader.as_mut()?;
    self.buf.clear();
    match reader.read_until(b'\n', &mut self.buf) {
      Ok(0) => {
        self.reader = None;
        None
      }
      Ok(n) => {
        self.remaining -= 1;
        self.offset += n as u64;
        Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
      }
      Err(e) => {
        self.reader = None;
        Some(Err(e.into()))
      }
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.remaining()))
  }
}

impl FusedIterator for LineChunk {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn skip_lines_counts_bytes_across_small_buffers() {
    let data = b"aa\nbbb\nc\ndddd\n";
    let mut reader = BufReader::with_capacity(2, &data[..]);
    assert_eq!(skip_lines(&mut reader, 2).unwrap(), 7);
    let mut rest = String::new();
    reader.read_line(&mut rest).unwrap();
    assert_eq!(rest, "c\n");
  }

  #[test]
  fn skip_lines_stops_at_eof() {
    let data = b"a\nb";
    let mut reader = io::Cursor::new(&data[..]);
    assert_eq!(skip_lines(&mut reader, 10).unwrap(), 3);
    assert_eq!(skip_lines(&mut reader, 0).unwrap(), 0);
  }

  #[test]
  fn chunk_tracks_offset_and_fuses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    std::fs::write(&path, "one\ntwo\nthree").unwrap();

    let reader = open_at_offset(&path, 4).unwrap();
    let mut chunk = LineChunk::new(reader, 2, 4, 5);
    assert_eq!(chunk.next().unwrap().unwrap(), "two\n");
    assert_eq!(chunk.offset(), 8);
    assert!(!chunk.at_eof().unwrap());
    assert_eq!(chunk.next().unwrap().unwrap(), "three");
    assert!(chunk.at_eof().unwrap());
    assert!(chunk.next().is_none());
    assert!(chunk.next().is_none());
    assert_eq!(chunk.remaining(), 0);
    assert_eq!(chunk.start_line(), 2);
    assert_eq!(chunk.start_offset(), 4);
  }

  // Opening a directory succeeds on unix, reading from it fails with EISDIR.
  #[cfg(unix)]
  #[test]
  fn read_error_surfaces_once_then_fuses() {
    let dir = tempfile::tempdir().unwrap();
    let reader = BufReader::new(File::open(dir.path()).unwrap());
    let mut chunk = LineChunk::new(reader, 1, 0, 10);
    assert!(matches!(chunk.next(), Some(Err(LogError::Io(_)))));
    assert!(chunk.next().is_none());
    assert_eq!(chunk.remaining(), 0);
    assert!(chunk.at_eof().unwrap());
  }
}
