mod cursor;
mod engine;
mod index;
mod lines;
mod listing;
mod models;

pub use crate::engine::{LogError, LogOptions, LogService};
pub use crate::index::{build_line_index, IndexCache, LineIndex, DEFAULT_GRANULARITY};
pub use crate::lines::LineChunk;
pub use crate::models::{CacheStats, LinePage, LogFileInfo};
