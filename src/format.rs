//! On-disk layout of a seekable compressed stream.
//!
//! ```text
//! [ CommonHeader 24 ][ KindHeader 8 ][ CodecInitHeader 8 ]
//! [ zstd frame 0 ][ zstd frame 1 ] ... [ zstd frame K ]
//! [ SeekPoint 0 ][ SeekPoint 1 ] ... [ SeekPoint K ]
//! ```
//!
//! All integers are little-endian at fixed offsets. The footer is located
//! from the end of the stream using the seek point count stored in the
//! kind header.

use crate::raw::RawStream;
use crate::seek_table::{SeekPoint, SeekPointTable};
use crate::{Error, Result};

pub const STREAM_MAGIC: [u8; 8] = *b"SEEKZST\0";
pub const STREAM_VERSION: u16 = 1;
pub const COMMON_HEADER_LEN: u16 = 24;
pub const KIND_HEADER_LEN: usize = 8;
pub const CODEC_HEADER_LEN: usize = 8;
pub const HEADER_END: u64 =
    COMMON_HEADER_LEN as u64 + KIND_HEADER_LEN as u64 + CODEC_HEADER_LEN as u64;
pub const SEEK_POINT_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CompressorKind {
    Zstd = 1,
}

impl CompressorKind {
    fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Zstd),
            other => Err(Error::UnsupportedCompressor(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub kind: CompressorKind,
    pub uncompressed_size: u64,
    pub seek_point_count: u32,
    pub footer_crc: u32,
    pub level: i32,
    pub window_log: u32,
}

impl StreamHeader {
    pub fn new(level: i32, window_log: u32) -> Self {
        Self {
            kind: CompressorKind::Zstd,
            uncompressed_size: 0,
            seek_point_count: 0,
            footer_crc: 0,
            level,
            window_log,
        }
    }

    pub fn footer_len(&self) -> u64 {
        self.seek_point_count as u64 * SEEK_POINT_LEN as u64
    }

    pub fn to_bytes(&self) -> [u8; HEADER_END as usize] {
        let mut buf = [0u8; HEADER_END as usize];
        buf[0..8].copy_from_slice(&STREAM_MAGIC);
        buf[8..10].copy_from_slice(&STREAM_VERSION.to_le_bytes());
        buf[10..12].copy_from_slice(&COMMON_HEADER_LEN.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[16..24].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        // kind header
        buf[24..28].copy_from_slice(&self.seek_point_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.footer_crc.to_le_bytes());
        // codec init header
        buf[32..36].copy_from_slice(&self.level.to_le_bytes());
        buf[36..40].copy_from_slice(&self.window_log.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_END as usize {
            return Err(Error::Corrupt("stream header too small"));
        }
        if buf[0..8] != STREAM_MAGIC {
            return Err(Error::Corrupt("stream magic mismatch"));
        }
        let version = u16::from_le_bytes(buf[8..10].try_into().expect("slice length"));
        if version != STREAM_VERSION {
            return Err(Error::UnsupportedVersion(version as u32));
        }
        let header_len = u16::from_le_bytes(buf[10..12].try_into().expect("slice length"));
        if header_len != COMMON_HEADER_LEN {
            return Err(Error::Corrupt("stream header length mismatch"));
        }
        let kind = CompressorKind::from_raw(u32::from_le_bytes(
            buf[12..16].try_into().expect("slice length"),
        ))?;
        let uncompressed_size = u64::from_le_bytes(buf[16..24].try_into().expect("slice length"));
        let seek_point_count = u32::from_le_bytes(buf[24..28].try_into().expect("slice length"));
        let footer_crc = u32::from_le_bytes(buf[28..32].try_into().expect("slice length"));
        let level = i32::from_le_bytes(buf[32..36].try_into().expect("slice length"));
        let window_log = u32::from_le_bytes(buf[36..40].try_into().expect("slice length"));
        Ok(Self {
            kind,
            uncompressed_size,
            seek_point_count,
            footer_crc,
            level,
            window_log,
        })
    }
}

pub fn encode_footer(table: &SeekPointTable) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.len() * SEEK_POINT_LEN);
    for point in table.points() {
        out.extend_from_slice(&point.logical_offset.to_le_bytes());
        out.extend_from_slice(&point.physical_offset.to_le_bytes());
    }
    out
}

pub fn decode_footer(buf: &[u8]) -> Result<SeekPointTable> {
    if buf.is_empty() || buf.len() % SEEK_POINT_LEN != 0 {
        return Err(Error::Corrupt("seek point footer length mismatch"));
    }
    let mut points = Vec::with_capacity(buf.len() / SEEK_POINT_LEN);
    for record in buf.chunks_exact(SEEK_POINT_LEN) {
        let logical_offset = u64::from_le_bytes(record[0..8].try_into().expect("slice length"));
        let physical_offset = u64::from_le_bytes(record[8..16].try_into().expect("slice length"));
        points.push(SeekPoint {
            logical_offset,
            physical_offset,
        });
    }
    SeekPointTable::from_points(points, HEADER_END)
}

pub fn footer_crc(footer: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(footer);
    hasher.finalize()
}

/// A decoded stream layout: header, seek table, and where the compressed
/// payload ends.
#[derive(Debug)]
pub struct StreamLayout {
    pub header: StreamHeader,
    pub table: SeekPointTable,
    pub payload_end: u64,
}

pub fn read_layout(raw: &mut dyn RawStream) -> Result<StreamLayout> {
    let total_len = raw.len()?;
    if total_len < HEADER_END {
        return Err(Error::Corrupt("stream shorter than header"));
    }
    let mut header_buf = [0u8; HEADER_END as usize];
    if raw.read_at(0, &mut header_buf)? != header_buf.len() {
        return Err(Error::Corrupt("stream header truncated"));
    }
    let header = StreamHeader::from_bytes(&header_buf)?;
    if header.seek_point_count == 0 {
        return Err(Error::Corrupt("stream has no seek points"));
    }

    let footer_len = header.footer_len();
    if total_len < HEADER_END + footer_len {
        return Err(Error::Corrupt("seek point footer length mismatch"));
    }
    let payload_end = total_len - footer_len;
    let footer_len =
        usize::try_from(footer_len).map_err(|_| Error::Corrupt("seek point count overflow"))?;
    let mut footer = vec![0u8; footer_len];
    if raw.read_at(payload_end, &mut footer)? != footer_len {
        return Err(Error::Corrupt("seek point footer truncated"));
    }
    if footer_crc(&footer) != header.footer_crc {
        return Err(Error::Corrupt("seek point footer checksum mismatch"));
    }
    let table = decode_footer(&footer)?;
    if table.last().physical_offset > payload_end {
        return Err(Error::Corrupt("seek point beyond payload"));
    }

    Ok(StreamLayout {
        header,
        table,
        payload_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_table() -> SeekPointTable {
        let mut table = SeekPointTable::new(HEADER_END);
        table.append(SeekPoint {
            logical_offset: 4096,
            physical_offset: HEADER_END + 100,
        });
        table
    }

    #[test]
    fn header_bytes_round_trip() {
        let mut header = StreamHeader::new(7, 21);
        header.uncompressed_size = 1 << 33;
        header.seek_point_count = 3;
        header.footer_crc = 0xdead_beef;
        let decoded = StreamHeader::from_bytes(&header.to_bytes()).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_bad_magic_and_version() {
        let mut bytes = StreamHeader::new(3, 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(StreamHeader::from_bytes(&bytes), Err(Error::Corrupt(_))));

        let mut bytes = StreamHeader::new(3, 0).to_bytes();
        bytes[8..10].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            StreamHeader::from_bytes(&bytes),
            Err(Error::UnsupportedVersion(9))
        ));

        let mut bytes = StreamHeader::new(3, 0).to_bytes();
        bytes[12..16].copy_from_slice(&42u32.to_le_bytes());
        assert!(matches!(
            StreamHeader::from_bytes(&bytes),
            Err(Error::UnsupportedCompressor(42))
        ));

        assert!(StreamHeader::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn footer_records_are_little_endian() {
        let footer = encode_footer(&sample_table());
        assert_eq!(footer.len(), 2 * SEEK_POINT_LEN);
        assert_eq!(&footer[0..8], &0u64.to_le_bytes());
        assert_eq!(&footer[8..16], &HEADER_END.to_le_bytes());
        assert_eq!(&footer[16..24], &4096u64.to_le_bytes());
        let table = decode_footer(&footer).expect("decode");
        assert_eq!(table, sample_table());
    }

    fn layout_bytes(table: &SeekPointTable, payload: &[u8]) -> Vec<u8> {
        let footer = encode_footer(table);
        let mut header = StreamHeader::new(3, 0);
        header.seek_point_count = table.len() as u32;
        header.footer_crc = footer_crc(&footer);
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out.extend_from_slice(&footer);
        out
    }

    #[test]
    fn read_layout_locates_footer_from_tail() {
        let bytes = layout_bytes(&sample_table(), &[0u8; 200]);
        let mut raw = Cursor::new(bytes);
        let layout = read_layout(&mut raw).expect("layout");
        assert_eq!(layout.table, sample_table());
        assert_eq!(layout.payload_end, HEADER_END + 200);
    }

    #[test]
    fn read_layout_rejects_zero_seek_points() {
        let mut raw = Cursor::new(StreamHeader::new(3, 0).to_bytes().to_vec());
        assert!(matches!(read_layout(&mut raw), Err(Error::Corrupt(_))));
    }

    #[test]
    fn read_layout_rejects_truncated_streams() {
        let mut raw = Cursor::new(vec![0u8; 10]);
        assert!(matches!(read_layout(&mut raw), Err(Error::Corrupt(_))));

        let mut bytes = layout_bytes(&sample_table(), &[]);
        // Claim more seek points than the stream can hold.
        bytes[24..28].copy_from_slice(&100u32.to_le_bytes());
        let mut raw = Cursor::new(bytes);
        assert!(matches!(read_layout(&mut raw), Err(Error::Corrupt(_))));
    }

    #[test]
    fn read_layout_detects_footer_corruption() {
        let mut bytes = layout_bytes(&sample_table(), &[0u8; 200]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut raw = Cursor::new(bytes);
        assert!(matches!(read_layout(&mut raw), Err(Error::Corrupt(_))));
    }
}
