//! Staging buffer for still-compressed bytes, shared by every stream of one
//! engine.
//!
//! Streams hold a [`BufferLease`] while they use the buffer. The storage is
//! allocated on the first lease and freed when the last lease drops. The
//! buffer remembers which stream and physical range it staged last, so a
//! reader that comes back for the bytes right after the ones it consumed
//! only tops up the remainder instead of re-reading everything.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::raw::RawStream;

/// Opaque identity of one open stream, compared by value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LastRead {
    stream: StreamId,
    physical_offset: u64,
    len: usize,
}

/// Outcome of staging compressed bytes for a reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Fill {
    pub available: usize,
    pub reused: usize,
}

pub(crate) struct SharedCompressedBuffer {
    size: usize,
    data: Vec<u8>,
    use_count: usize,
    last_read: Option<LastRead>,
}

impl SharedCompressedBuffer {
    fn new(size: usize) -> Self {
        Self {
            size,
            data: Vec::new(),
            use_count: 0,
            last_read: None,
        }
    }

    fn acquire(&mut self) {
        if self.data.is_empty() {
            self.data = vec![0u8; self.size];
            log::debug!("allocated shared compressed buffer ({} bytes)", self.size);
        }
        self.use_count += 1;
    }

    fn release(&mut self) {
        assert!(self.use_count > 0, "shared compressed buffer released more times than acquired");
        self.use_count -= 1;
        if self.use_count == 0 {
            self.data = Vec::new();
            self.last_read = None;
            log::debug!("freed shared compressed buffer");
        }
    }

    /// Forget the last staged range. Every write goes through here first.
    pub(crate) fn invalidate(&mut self) {
        self.last_read = None;
    }

    /// Scratch space for encoder output; the staged read memo is dropped.
    pub(crate) fn write_space(&mut self) -> &mut [u8] {
        self.invalidate();
        &mut self.data
    }

    pub(crate) fn staged(&self, len: usize) -> &[u8] {
        &self.data[..len]
    }

    /// Stage compressed bytes starting at `physical_offset` for `stream`,
    /// never reading at or past `payload_end`. Returns how many bytes are
    /// available at the front of the buffer; 0 means end of payload.
    pub(crate) fn fill_for(
        &mut self,
        stream: StreamId,
        raw: &mut dyn RawStream,
        physical_offset: u64,
        payload_end: u64,
    ) -> std::io::Result<Fill> {
        let mut kept = 0usize;
        match self.last_read {
            Some(last)
                if last.stream == stream
                    && physical_offset >= last.physical_offset
                    && physical_offset < last.physical_offset + last.len as u64 =>
            {
                let start = (physical_offset - last.physical_offset) as usize;
                kept = last.len - start;
                self.data.copy_within(start..last.len, 0);
            }
            _ => {}
        }
        self.last_read = None;

        let top_up_at = physical_offset + kept as u64;
        let want = (self.data.len() - kept).min(payload_end.saturating_sub(top_up_at) as usize);
        let read = if want > 0 {
            raw.read_at(top_up_at, &mut self.data[kept..kept + want])?
        } else {
            0
        };

        let available = kept + read;
        if available > 0 {
            self.last_read = Some(LastRead {
                stream,
                physical_offset,
                len: available,
            });
        }
        Ok(Fill {
            available,
            reused: kept,
        })
    }
}

/// Handle to the engine's shared buffer pool.
#[derive(Clone)]
pub(crate) struct BufferPool {
    inner: Arc<Mutex<SharedCompressedBuffer>>,
}

impl BufferPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SharedCompressedBuffer::new(size))),
        }
    }

    pub(crate) fn acquire(&self) -> BufferLease {
        lock(&self.inner).acquire();
        BufferLease {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn use_count(&self) -> usize {
        lock(&self.inner).use_count
    }

    pub(crate) fn is_allocated(&self) -> bool {
        !lock(&self.inner).data.is_empty()
    }
}

/// One counted use of the shared buffer; released on drop.
pub(crate) struct BufferLease {
    inner: Arc<Mutex<SharedCompressedBuffer>>,
}

impl BufferLease {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedCompressedBuffer> {
        lock(&self.inner)
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        lock(&self.inner).release();
    }
}

fn lock(inner: &Mutex<SharedCompressedBuffer>) -> MutexGuard<'_, SharedCompressedBuffer> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(len: usize) -> Cursor<Vec<u8>> {
        Cursor::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    #[test]
    fn allocates_on_first_lease_and_frees_on_last() {
        let pool = BufferPool::new(64);
        assert!(!pool.is_allocated());
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(pool.is_allocated());
        assert_eq!(pool.use_count(), 2);
        drop(a);
        assert!(pool.is_allocated());
        assert_eq!(pool.use_count(), 1);
        drop(b);
        assert_eq!(pool.use_count(), 0);
        assert!(!pool.is_allocated());
    }

    #[test]
    fn fill_reuses_unconsumed_tail_for_same_stream() {
        let pool = BufferPool::new(64);
        let lease = pool.acquire();
        let mut raw = source(1000);
        let id = StreamId(1);

        let mut buf = lease.lock();
        let first = buf.fill_for(id, &mut raw, 100, 1000).expect("fill");
        assert_eq!(first, Fill { available: 64, reused: 0 });
        assert_eq!(buf.staged(1)[0], (100 % 251) as u8);

        // Consumed 40 of the 64 staged bytes.
        let second = buf.fill_for(id, &mut raw, 140, 1000).expect("fill");
        assert_eq!(second, Fill { available: 64, reused: 24 });
        let expected: Vec<u8> = (140..204).map(|i| (i % 251) as u8).collect();
        assert_eq!(buf.staged(64), expected.as_slice());
    }

    #[test]
    fn other_stream_or_write_forces_full_read() {
        let pool = BufferPool::new(64);
        let lease = pool.acquire();
        let mut raw = source(1000);

        let mut buf = lease.lock();
        buf.fill_for(StreamId(1), &mut raw, 0, 1000).expect("fill");
        let other = buf.fill_for(StreamId(2), &mut raw, 10, 1000).expect("fill");
        assert_eq!(other.reused, 0);

        buf.fill_for(StreamId(1), &mut raw, 0, 1000).expect("fill");
        buf.write_space();
        let after_write = buf.fill_for(StreamId(1), &mut raw, 10, 1000).expect("fill");
        assert_eq!(after_write.reused, 0);
        assert_eq!(buf.staged(1)[0], 10);
    }

    #[test]
    fn fill_is_clamped_to_payload_end() {
        let pool = BufferPool::new(64);
        let lease = pool.acquire();
        let mut raw = source(1000);

        let mut buf = lease.lock();
        let fill = buf.fill_for(StreamId(1), &mut raw, 980, 990).expect("fill");
        assert_eq!(fill.available, 10);
        let end = buf.fill_for(StreamId(1), &mut raw, 990, 990).expect("fill");
        assert_eq!(end.available, 0);
    }
}
