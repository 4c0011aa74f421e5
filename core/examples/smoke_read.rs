use std::path::PathBuf;

use buildlog_core::{LogOptions, LogService};

fn main() -> Result<(), String> {
  let mut args = std::env::args().skip(1);
  let path = args.next().ok_or_else(|| {
    "usage: cargo run -p buildlog_core --example smoke_read -- <log-file> [start_line] [num_lines]"
      .to_string()
  })?;
  let start_line: i64 = args
    .next()
    .map(|s| s.parse::<i64>().map_err(|e| format!("start_line: {e}")))
    .transpose()?
    .unwrap_or(1);
  let num_lines: usize = args
    .next()
    .map(|s| s.parse::<usize>().map_err(|e| format!("num_lines: {e}")))
    .transpose()?
    .unwrap_or(20);

  let path = PathBuf::from(path);
  let filename = path
    .file_name()
    .and_then(|s| s.to_str())
    .ok_or_else(|| "path has no file name".to_string())?
    .to_string();
  let logs_dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));

  let svc = LogService::new(LogOptions {
    logs_dir,
    ..LogOptions::default()
  })
  .map_err(|e| e.to_string())?;

  println!("lines={}", svc.line_count(&filename).map_err(|e| e.to_string())?);
  let chunk = svc
    .read_lines(&filename, start_line, num_lines)
    .map_err(|e| e.to_string())?;
  println!("offset={}", chunk.start_offset());
  for line in chunk {
    print!("{}", line.map_err(|e| e.to_string())?);
  }
  Ok(())
}
