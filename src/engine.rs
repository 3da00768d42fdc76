use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{EngineConfig, WriterConfig};
use crate::raw::RawStream;
use crate::reader::ZstdReader;
use crate::shared_buffer::{BufferPool, StreamId};
use crate::writer::ZstdWriter;
use crate::Result;

/// Entry point for opening seekable zstd streams.
///
/// Every stream opened through one engine shares a single compressed
/// staging buffer. Callers serialize access to streams of the same engine;
/// interleaved reads on different streams stay correct but lose the staged
/// bytes each time they alternate.
pub struct ZstdEngine {
    config: EngineConfig,
    pool: BufferPool,
    next_stream_id: AtomicU64,
}

impl ZstdEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: BufferPool::new(config.compressed_buffer_size),
            config,
            next_stream_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new stream on an empty `raw`.
    pub fn create<R: RawStream>(&self, raw: R, config: WriterConfig) -> Result<ZstdWriter<R>> {
        ZstdWriter::create(self.issue_id(), self.pool.clone(), &config, raw)
    }

    /// Open a finished stream for random-access reads.
    pub fn open<R: RawStream>(&self, raw: R) -> Result<ZstdReader<R>> {
        ZstdReader::open(self.issue_id(), self.pool.clone(), &self.config, raw)
    }

    /// Streams currently holding the shared buffer.
    pub fn buffer_use_count(&self) -> usize {
        self.pool.use_count()
    }

    pub fn buffer_allocated(&self) -> bool {
        self.pool.is_allocated()
    }

    fn issue_id(&self) -> StreamId {
        StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for ZstdEngine {
    fn drop(&mut self) {
        let outstanding = self.pool.use_count();
        if outstanding > 0 {
            log::warn!(
                "engine dropped with {} outstanding shared buffer lease(s)",
                outstanding
            );
        }
    }
}
