//! Seekable block compression over an append-mostly byte stream.
//!
//! Writers append uncompressed bytes; the engine compresses them with zstd
//! and records seek points where decoding can restart. Readers address the
//! stream by logical `(offset, length)` and the engine finds the nearest
//! seek point, decodes, and keeps the last decoded block around for nearby
//! reads.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod raw;
pub mod reader;
pub mod seek_table;
pub mod writer;

mod codec;
mod shared_buffer;

pub use config::{EngineConfig, WriterConfig, BLOCK_GRANULARITY};
pub use engine::ZstdEngine;
pub use error::{Error, Result};
pub use format::{CompressorKind, StreamHeader};
pub use raw::RawStream;
pub use reader::{ReadStats, ZstdReader};
pub use seek_table::{SeekPoint, SeekPointTable};
pub use shared_buffer::StreamId;
pub use writer::{WriteSummary, ZstdWriter, APPEND_OFFSET};
