//! Binary dump format (v2).
//!
//! ## File layout
//! ```text
//! Header:  version(i32) + record_count(u32)                          = 8 bytes
//! Body:    record_count × (tid(u8) + event(u8) + cid(u16) + us(u32))  = 8 bytes each
//! ```
//!
//! All integers are in native byte order and records are laid out exactly as
//! `TraceRecord` is in memory, so the body is written straight from the
//! buffer. Records appear in append order. There is no magic number; readers
//! identify the file by its name and check the version.
//!
//! A dump that reuses an existing file overwrites from offset 0 without
//! truncating, so bytes past `HEADER_SIZE + record_count * RECORD_SIZE` may be
//! left over from an earlier, larger dump. Readers must trust `record_count`,
//! not the file length.

use crate::trace::events::TraceRecord;
use bytemuck::{Pod, Zeroable};
use std::io::{ErrorKind, Read, Result, Write};

pub const VERSION: i32 = 2;
pub const HEADER_SIZE: usize = 8;
pub const RECORD_SIZE: usize = std::mem::size_of::<TraceRecord>();

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TraceHeader {
    pub version: i32,
    pub record_count: u32,
}

impl TraceHeader {
    pub fn new(record_count: u32) -> Self {
        Self {
            version: VERSION,
            record_count,
        }
    }

    /// Bytes covered by this header and the records it announces.
    pub fn dump_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.record_count as u64 * RECORD_SIZE as u64
    }
}

pub fn encode_record(record: &TraceRecord) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[0] = record.thread_id;
    buf[1] = record.event;
    buf[2..4].copy_from_slice(&record.correlation_id.to_ne_bytes());
    buf[4..8].copy_from_slice(&record.timestamp_us.to_ne_bytes());
    buf
}

pub fn decode_record(buf: &[u8; RECORD_SIZE]) -> TraceRecord {
    TraceRecord {
        thread_id: buf[0],
        event: buf[1],
        correlation_id: u16::from_ne_bytes([buf[2], buf[3]]),
        timestamp_us: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
    }
}

pub fn write_header(w: &mut impl Write, record_count: u32) -> Result<()> {
    let header = TraceHeader::new(record_count);
    w.write_all(bytemuck::bytes_of(&header))
}

/// Write all records in one call. The slice is reinterpreted as bytes, no copy.
pub fn write_records(w: &mut impl Write, records: &[TraceRecord]) -> Result<()> {
    w.write_all(bytemuck::cast_slice(records))
}

pub fn read_header(r: &mut impl Read) -> Result<TraceHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    r.read_exact(&mut buf)?;
    Ok(TraceHeader {
        version: i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
        record_count: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
    })
}

/// Read one record. Returns `Ok(None)` at EOF, including a torn trailing record.
pub fn read_record(r: &mut impl Read) -> Result<Option<TraceRecord>> {
    let mut buf = [0u8; RECORD_SIZE];
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(Some(decode_record(&buf))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
