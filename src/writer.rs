use std::io::Write;

use crate::codec::{BlockEncoder, FlushMode};
use crate::config::WriterConfig;
use crate::format::{encode_footer, footer_crc, StreamHeader, HEADER_END};
use crate::raw::RawStream;
use crate::seek_table::{SeekPoint, SeekPointTable};
use crate::shared_buffer::{BufferLease, BufferPool, StreamId};
use crate::{Error, Result};

/// Offset sentinel for [`ZstdWriter::write_at`] meaning "at the current end".
pub const APPEND_OFFSET: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteSummary {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub seek_points: usize,
}

/// Append-only writer producing a seekable compressed stream.
///
/// Bytes are compressed as they arrive. With a non-zero
/// `auto_seek_interval` a seek point is recorded whenever that many bytes
/// have been written since the previous one. [`ZstdWriter::finish`] writes
/// the seek table footer and the final header; dropping an unfinished
/// writer does the same on a best-effort basis.
pub struct ZstdWriter<R: RawStream> {
    id: StreamId,
    pool: BufferPool,
    lease: Option<BufferLease>,
    session: WriteSession<R>,
    finished: bool,
}

struct WriteSession<R: RawStream> {
    raw: R,
    encoder: BlockEncoder,
    header: StreamHeader,
    table: SeekPointTable,
    total_written: u64,
    physical_end: u64,
    auto_seek_interval: u64,
    short_write: Option<(usize, usize)>,
}

impl<R: RawStream> ZstdWriter<R> {
    pub(crate) fn create(
        id: StreamId,
        pool: BufferPool,
        config: &WriterConfig,
        mut raw: R,
    ) -> Result<Self> {
        config.validate()?;
        if !raw.is_empty()? {
            return Err(Error::InvalidConfig("output stream must be empty"));
        }
        let level = config.clamped_level();
        let header = StreamHeader::new(level, config.window_log);
        let bytes = header.to_bytes();
        let written = raw.append(&bytes)?;
        if written != bytes.len() {
            return Err(Error::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }
        log::debug!(
            "created stream {:?} (level {}, auto seek every {} bytes)",
            id,
            level,
            config.auto_seek_interval
        );

        Ok(Self {
            id,
            pool,
            lease: None,
            session: WriteSession {
                raw,
                encoder: BlockEncoder::new(level, config.window_log)?,
                header,
                table: SeekPointTable::new(HEADER_END),
                total_written: 0,
                physical_end: HEADER_END,
                auto_seek_interval: config.auto_seek_interval,
                short_write: None,
            },
            finished: false,
        })
    }

    /// Logical bytes accepted so far.
    pub fn len(&self) -> u64 {
        self.session.total_written
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seek_points(&self) -> &[SeekPoint] {
        self.session.table.points()
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_at(APPEND_OFFSET, buf)
    }

    /// Compress `buf` at logical `offset`, which must be the current length
    /// or [`APPEND_OFFSET`]. A return value below `buf.len()` means the
    /// underlying stream stopped accepting bytes.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        assert!(!self.finished, "write on a finished stream");
        assert!(
            offset == APPEND_OFFSET || offset == self.session.total_written,
            "non-append write at {} (stream length {})",
            offset,
            self.session.total_written
        );
        if buf.is_empty() || self.session.short_write.is_some() {
            return Ok(0);
        }

        let pool = &self.pool;
        let lease = self.lease.get_or_insert_with(|| pool.acquire());
        let mut shared = lease.lock();
        let out = shared.write_space();
        let session = &mut self.session;

        let mut accepted = 0usize;
        while accepted < buf.len() {
            let remaining = buf.len() - accepted;
            let chunk_len = match session.bytes_until_seek_point() {
                Some(limit) => remaining.min(usize::try_from(limit).unwrap_or(usize::MAX)),
                None => remaining,
            };
            let chunk = &buf[accepted..accepted + chunk_len];
            let compressed = session.compress(chunk, out)?;
            accepted += compressed;
            session.total_written += compressed as u64;
            if compressed < chunk_len {
                return Ok(accepted);
            }
            if session.seek_point_due() {
                session.mark_seek_point(out)?;
            }
        }
        Ok(accepted)
    }

    /// Push everything compressed so far to the underlying stream without
    /// ending the zstd frame, so no seek point is created.
    pub fn flush(&mut self) -> Result<()> {
        if let Some((expected, written)) = self.session.short_write {
            return Err(Error::ShortWrite { expected, written });
        }
        if self.session.total_written == 0 {
            return Ok(());
        }
        let pool = &self.pool;
        let lease = self.lease.get_or_insert_with(|| pool.acquire());
        let mut shared = lease.lock();
        self.session.drain(FlushMode::Pending, shared.write_space())
    }

    /// Record a seek point at the current length. Returns `false` when no
    /// bytes arrived since the last one.
    pub fn insert_seek_point(&mut self) -> Result<bool> {
        assert!(!self.finished, "seek point on a finished stream");
        if self.session.total_written == self.session.table.last().logical_offset {
            return Ok(false);
        }
        let pool = &self.pool;
        let lease = self.lease.get_or_insert_with(|| pool.acquire());
        let mut shared = lease.lock();
        self.session.mark_seek_point(shared.write_space())?;
        Ok(true)
    }

    /// Drain the compressor, append the seek table and rewrite the header.
    pub fn finish(mut self) -> Result<WriteSummary> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<WriteSummary> {
        self.finished = true;
        let result = {
            let pool = &self.pool;
            let lease = self.lease.get_or_insert_with(|| pool.acquire());
            let mut shared = lease.lock();
            self.session.finalize(shared.write_space())
        };
        self.lease = None;
        if let Ok(summary) = &result {
            log::debug!(
                "finished stream {:?}: {} -> {} bytes, {} seek points",
                self.id,
                summary.uncompressed_size,
                summary.compressed_size,
                summary.seek_points
            );
        }
        result
    }
}

impl<R: RawStream> WriteSession<R> {
    /// Compress all of `input`, appending output as it is produced. Returns
    /// the input bytes whose output reached the stream.
    fn compress(&mut self, input: &[u8], out: &mut [u8]) -> Result<usize> {
        let mut consumed = 0usize;
        while consumed < input.len() {
            let progress = self.encoder.compress(&input[consumed..], out)?;
            if progress.produced > 0 {
                let written = self.raw.append(&out[..progress.produced])?;
                self.physical_end += written as u64;
                if written < progress.produced {
                    self.short_write = Some((progress.produced, written));
                    return Ok(consumed);
                }
            }
            consumed += progress.consumed;
        }
        Ok(consumed)
    }

    fn drain(&mut self, mode: FlushMode, out: &mut [u8]) -> Result<()> {
        loop {
            let (produced, done) = self.encoder.flush(mode, out)?;
            if produced > 0 {
                let written = self.raw.append(&out[..produced])?;
                self.physical_end += written as u64;
                if written < produced {
                    self.short_write = Some((produced, written));
                    return Err(Error::ShortWrite {
                        expected: produced,
                        written,
                    });
                }
            }
            if done {
                return Ok(());
            }
        }
    }

    /// How many more bytes may be compressed before the seek point policy
    /// fires, or `None` when automatic seek points are off.
    fn bytes_until_seek_point(&self) -> Option<u64> {
        if self.auto_seek_interval == 0 {
            return None;
        }
        let since_last = self.total_written - self.table.last().logical_offset;
        let threshold = if self.table.len() == 1 {
            self.auto_seek_interval
        } else {
            self.auto_seek_interval + 1
        };
        Some(threshold.saturating_sub(since_last).max(1))
    }

    fn seek_point_due(&self) -> bool {
        if self.auto_seek_interval == 0 {
            return false;
        }
        let last = self.table.last();
        (self.table.len() == 1 && self.total_written >= self.auto_seek_interval)
            || self.total_written - last.logical_offset > self.auto_seek_interval
    }

    fn mark_seek_point(&mut self, out: &mut [u8]) -> Result<()> {
        self.drain(FlushMode::FullSync, out)?;
        let point = SeekPoint {
            logical_offset: self.total_written,
            physical_offset: self.physical_end,
        };
        log::debug!(
            "seek point {}: logical {} physical {}",
            self.table.len(),
            point.logical_offset,
            point.physical_offset
        );
        self.table.append(point);
        Ok(())
    }

    fn finalize(&mut self, out: &mut [u8]) -> Result<WriteSummary> {
        if let Some((expected, written)) = self.short_write {
            return Err(Error::ShortWrite { expected, written });
        }
        self.drain(FlushMode::EndOfStream, out)?;

        let footer = encode_footer(&self.table);
        let written = self.raw.append(&footer)?;
        if written != footer.len() {
            return Err(Error::ShortWrite {
                expected: footer.len(),
                written,
            });
        }
        self.physical_end += footer.len() as u64;

        self.header.uncompressed_size = self.total_written;
        self.header.seek_point_count = u32::try_from(self.table.len())
            .map_err(|_| Error::Corrupt("seek point count overflow"))?;
        self.header.footer_crc = footer_crc(&footer);
        let bytes = self.header.to_bytes();
        let written = self.raw.write_at(0, &bytes)?;
        if written != bytes.len() {
            return Err(Error::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }

        Ok(WriteSummary {
            uncompressed_size: self.total_written,
            compressed_size: self.physical_end,
            seek_points: self.table.len(),
        })
    }
}

impl<R: RawStream> Write for ZstdWriter<R> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.write_at(APPEND_OFFSET, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(ZstdWriter::flush(self)?)
    }
}

impl<R: RawStream> Drop for ZstdWriter<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.finalize() {
            log::warn!("stream {:?} dropped without finish; finalize failed: {}", self.id, err);
        }
    }
}
