//! Byte-oriented storage underneath a compressed stream.
//!
//! Every transfer reports how many bytes actually moved. A count smaller
//! than requested means the storage ran out (end of data on read, no room
//! on write); hard failures surface as `Err`.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

pub trait RawStream {
    /// Read up to `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Overwrite bytes at `offset`. Used only to rewrite headers.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<usize>;

    /// Append at the current end of the stream.
    fn append(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    fn len(&mut self) -> std::io::Result<u64>;

    fn is_empty(&mut self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: Read + Write + Seek> RawStream for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        let mut total = 0usize;
        while total < buf.len() {
            match self.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        write_until_short(self, buf)
    }

    fn append(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.seek(SeekFrom::End(0))?;
        write_until_short(self, buf)
    }

    fn len(&mut self) -> std::io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }
}

fn write_until_short<W: Write + ?Sized>(out: &mut W, buf: &[u8]) -> std::io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match out.write(&buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WriteZero => break,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}
