use crate::{Error, Result};

/// Allocation unit for the shared compressed buffer and the per-stream
/// decompression cache.
pub const BLOCK_GRANULARITY: usize = 32 * 1024;

pub const DEFAULT_COMPRESSED_BUFFER_SIZE: usize = 128 * 1024;
pub const DEFAULT_DECOMPRESSION_CACHE_SIZE: usize = 64 * 1024;
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Accepted range for an explicit zstd window log (0 means the level's
/// default). The upper bound holds on 32-bit targets too.
pub const MIN_WINDOW_LOG: u32 = 10;
pub const MAX_WINDOW_LOG: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of the staging buffer shared by every stream of one engine.
    pub compressed_buffer_size: usize,
    /// Size of each reader's decompressed window. 0 disables reuse across
    /// read calls.
    pub decompression_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compressed_buffer_size: DEFAULT_COMPRESSED_BUFFER_SIZE,
            decompression_cache_size: DEFAULT_DECOMPRESSION_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.compressed_buffer_size == 0 {
            return Err(Error::InvalidConfig("compressed_buffer_size must be > 0"));
        }
        if self.compressed_buffer_size % BLOCK_GRANULARITY != 0 {
            return Err(Error::InvalidConfig(
                "compressed_buffer_size must be a multiple of the block granularity",
            ));
        }
        if self.decompression_cache_size % BLOCK_GRANULARITY != 0 {
            return Err(Error::InvalidConfig(
                "decompression_cache_size must be a multiple of the block granularity",
            ));
        }
        Ok(())
    }

    /// Capacity of the window a reader decodes into.
    pub(crate) fn decode_window(&self) -> usize {
        if self.decompression_cache_size == 0 {
            BLOCK_GRANULARITY
        } else {
            self.decompression_cache_size
        }
    }

    pub(crate) fn caching_enabled(&self) -> bool {
        self.decompression_cache_size != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// Logical distance between automatic seek points. 0 disables them.
    pub auto_seek_interval: u64,
    pub level: i32,
    /// Base-2 log of the zstd match window. 0 uses the level's default.
    pub window_log: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            auto_seek_interval: 0,
            level: DEFAULT_ZSTD_LEVEL,
            window_log: 0,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_log != 0
            && !(MIN_WINDOW_LOG..=MAX_WINDOW_LOG).contains(&self.window_log)
        {
            return Err(Error::InvalidConfig("window_log out of range"));
        }
        Ok(())
    }

    pub(crate) fn clamped_level(&self) -> i32 {
        let range = zstd::compression_level_range();
        self.level.clamp(*range.start(), *range.end())
    }
}
