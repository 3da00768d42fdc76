use std::io::{Read, Seek, SeekFrom};

use crate::codec::BlockDecoder;
use crate::config::EngineConfig;
use crate::format::{read_layout, StreamHeader, StreamLayout};
use crate::raw::RawStream;
use crate::seek_table::{SeekPoint, SeekPointTable};
use crate::shared_buffer::{BufferLease, BufferPool, StreamId};
use crate::Result;

/// Counters for observing how reads were served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Calls into the zstd decoder.
    pub decompress_calls: u64,
    pub bytes_decompressed: u64,
    /// Times the decoder was reset to a seek point.
    pub jumps: u64,
    pub buffer_fills: u64,
    /// Fills that kept already-staged compressed bytes.
    pub buffer_reuses: u64,
}

/// The most recently decoded block: `data[..len]` holds the logical range
/// starting at `logical_offset`. The decoder resumes at `end()`.
struct DecompressedCache {
    data: Vec<u8>,
    logical_offset: u64,
    len: usize,
}

impl DecompressedCache {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            logical_offset: 0,
            len: 0,
        }
    }

    fn end(&self) -> u64 {
        self.logical_offset + self.len as u64
    }

    /// Copy the cached bytes starting at `offset` into the front of `out`.
    fn copy_overlap(&self, offset: u64, out: &mut [u8]) -> usize {
        if offset < self.logical_offset || offset >= self.end() {
            return 0;
        }
        let start = (offset - self.logical_offset) as usize;
        let n = out.len().min(self.len - start);
        out[..n].copy_from_slice(&self.data[start..start + n]);
        n
    }

    fn restart_at(&mut self, logical_offset: u64) {
        self.logical_offset = logical_offset;
        self.len = 0;
    }

    fn advance(&mut self, produced: usize) {
        self.logical_offset += self.len as u64;
        self.len = produced;
    }
}

/// Random-access reader over a finished seekable stream.
pub struct ZstdReader<R: RawStream> {
    id: StreamId,
    raw: R,
    pool: BufferPool,
    lease: Option<BufferLease>,
    layout: StreamLayout,
    decoder: BlockDecoder,
    cache: DecompressedCache,
    caching: bool,
    next_physical: u64,
    position: u64,
    stats: ReadStats,
}

impl<R: RawStream> ZstdReader<R> {
    pub(crate) fn open(
        id: StreamId,
        pool: BufferPool,
        config: &EngineConfig,
        mut raw: R,
    ) -> Result<Self> {
        let layout = read_layout(&mut raw)?;
        let root = layout.table.locate(0);
        let decoder = BlockDecoder::new(layout.header.window_log)?;
        log::debug!(
            "opened stream {:?}: {} bytes, {} seek points",
            id,
            layout.header.uncompressed_size,
            layout.table.len()
        );
        Ok(Self {
            id,
            raw,
            pool,
            lease: None,
            next_physical: root.physical_offset,
            layout,
            decoder,
            cache: DecompressedCache::new(config.decode_window()),
            caching: config.caching_enabled(),
            position: 0,
            stats: ReadStats::default(),
        })
    }

    /// Logical (uncompressed) length of the stream.
    pub fn len(&self) -> u64 {
        self.layout.header.uncompressed_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn header(&self) -> &StreamHeader {
        &self.layout.header
    }

    pub fn seek_points(&self) -> &[SeekPoint] {
        self.layout.table.points()
    }

    pub fn seek_table(&self) -> &SeekPointTable {
        &self.layout.table
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Read up to `buf.len()` bytes at logical `offset`. Returns fewer bytes
    /// only when the stream ends first.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let available = self.len().saturating_sub(offset);
        let want = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..want];

        let mut served = self.cache.copy_overlap(offset, buf);
        if served < want {
            let target = offset + served as u64;
            let point = self.layout.table.locate(target);
            if point.logical_offset > self.cache.end() || target < self.cache.logical_offset {
                self.jump_to(point)?;
            }
            served += self.decode_into(target, &mut buf[served..])?;
        }

        if !self.caching {
            let end = self.cache.end();
            self.cache.restart_at(end);
        }
        Ok(served)
    }

    fn jump_to(&mut self, point: SeekPoint) -> Result<()> {
        log::debug!(
            "stream {:?}: seek to logical {} (physical {})",
            self.id,
            point.logical_offset,
            point.physical_offset
        );
        self.decoder.reset()?;
        self.next_physical = point.physical_offset;
        self.cache.restart_at(point.logical_offset);
        self.stats.jumps += 1;
        Ok(())
    }

    /// Decode forward from the current position until `out` (which starts
    /// at logical `offset`) is full or the payload runs out.
    fn decode_into(&mut self, offset: u64, out: &mut [u8]) -> Result<usize> {
        let pool = &self.pool;
        let lease = self.lease.get_or_insert_with(|| pool.acquire());
        let mut shared = lease.lock();

        let mut served = 0usize;
        while served < out.len() {
            let fill =
                shared.fill_for(self.id, &mut self.raw, self.next_physical, self.layout.payload_end)?;
            self.stats.buffer_fills += 1;
            if fill.reused > 0 {
                self.stats.buffer_reuses += 1;
            }

            let progress = self
                .decoder
                .decompress(shared.staged(fill.available), &mut self.cache.data)?;
            self.stats.decompress_calls += 1;
            self.stats.bytes_decompressed += progress.produced as u64;
            self.next_physical += progress.consumed as u64;
            self.cache.advance(progress.produced);

            if progress.consumed == 0 && progress.produced == 0 {
                break;
            }
            served += self
                .cache
                .copy_overlap(offset + served as u64, &mut out[served..]);
        }
        Ok(served)
    }

    /// Release the shared buffer and drop the decode cache.
    pub fn close(self) {
        log::debug!("closed stream {:?}", self.id);
    }
}

impl<R: RawStream> Read for ZstdReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: RawStream> Seek for ZstdReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_copies_only_from_inside_window() {
        let mut cache = DecompressedCache::new(8);
        cache.data.copy_from_slice(b"abcdefgh");
        cache.restart_at(100);
        cache.advance(8);
        // advance moves past the previous (empty) window first.
        assert_eq!(cache.logical_offset, 100);
        assert_eq!(cache.end(), 108);

        let mut out = [0u8; 4];
        assert_eq!(cache.copy_overlap(99, &mut out), 0);
        assert_eq!(cache.copy_overlap(108, &mut out), 0);
        assert_eq!(cache.copy_overlap(102, &mut out), 4);
        assert_eq!(&out, b"cdef");
        assert_eq!(cache.copy_overlap(106, &mut out), 2);
        assert_eq!(&out[..2], b"gh");
    }

    #[test]
    fn advance_tracks_decoder_position() {
        let mut cache = DecompressedCache::new(8);
        cache.advance(8);
        cache.advance(5);
        assert_eq!(cache.logical_offset, 8);
        assert_eq!(cache.end(), 13);
    }
}
