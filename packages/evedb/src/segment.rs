//! Immutable slice containers.
//!
//! A segment packs table slices in id order into one self-describing
//! byte buffer. Slices decode lazily; the id index makes range selection
//! linear in the number of matching slices.
//!
//! Binary format (version 0):
//! ```text
//! header  : magic "VSEG" (4) | version: u16 LE (=0) | uuid: u128 LE (16)
//! index   : n_slices: u32 LE
//!           n_slices x { offset: u64 LE, rows: u32 LE, byte_off: u32 LE }
//! payload : concatenated slices, each length-prefixed with u32 LE
//! trailer : payload_len: u32 LE | index_len: u32 LE
//!           crc: u32 LE = crc32c(header || index || payload)
//! ```
//!
//! `byte_off` addresses the length prefix within the payload section.
//! A checksum mismatch is a hard load error.

use uuid::Uuid;

use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::error::{Error, Result, ResultExt};
use crate::slice::TableSlice;

pub const SEGMENT_MAGIC: [u8; 4] = *b"VSEG";
pub const SEGMENT_VERSION: u16 = 0;

/// header: magic(4) + version(2) + uuid(16)
const HEADER_SIZE: usize = 22;
/// trailer: payload_len(4) + index_len(4) + crc(4)
const TRAILER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SliceEntry {
    offset: u64,
    rows: u32,
    byte_off: u32,
}

// ── Builder ────────────────────────────────────────────────────────

/// Packs slices in id order into a segment buffer.
#[derive(Debug)]
pub struct SegmentBuilder {
    uuid: Uuid,
    entries: Vec<SliceEntry>,
    payload: Vec<u8>,
    next_id: u64,
}

impl SegmentBuilder {
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid, entries: Vec::new(), payload: Vec::new(), next_id: 0 }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn num_slices(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total rows across added slices.
    pub fn rows(&self) -> u64 {
        self.entries.iter().map(|e| e.rows as u64).sum()
    }

    /// Add a slice. Its offset must be at or past the end of the
    /// previously added slice.
    pub fn add(&mut self, slice: &TableSlice) -> Result<()> {
        if slice.offset() < self.next_id {
            return Err(Error::InvalidArgument(format!(
                "slice offset {} overlaps previous end {}",
                slice.offset(),
                self.next_id
            )));
        }
        let byte_off = self.payload.len() as u32;
        let mut body = Vec::new();
        slice.encode(&mut body)?;
        self.payload
            .extend_from_slice(&(body.len() as u32).to_le_bytes());
        self.payload.extend_from_slice(&body);
        self.entries.push(SliceEntry {
            offset: slice.offset(),
            rows: slice.rows() as u32,
            byte_off,
        });
        self.next_id = slice.offset() + slice.rows();
        Ok(())
    }

    /// Assemble the segment bytes and reset the builder.
    pub fn finish(&mut self) -> Chunk {
        let mut buf = Vec::with_capacity(
            HEADER_SIZE + 4 + self.entries.len() * 16 + self.payload.len() + TRAILER_SIZE,
        );
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.uuid.as_u128().to_le_bytes());

        let index_start = buf.len();
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.rows.to_le_bytes());
            buf.extend_from_slice(&entry.byte_off.to_le_bytes());
        }
        let index_len = (buf.len() - index_start) as u32;

        buf.extend_from_slice(&self.payload);
        let payload_len = self.payload.len() as u32;

        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&index_len.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());

        self.entries.clear();
        self.payload.clear();
        self.next_id = 0;
        Chunk::from_vec(buf)
    }
}

// ── Reader ─────────────────────────────────────────────────────────

/// An immutable segment backed by a shared chunk.
#[derive(Debug, Clone)]
pub struct Segment {
    chunk: Chunk,
    uuid: Uuid,
    entries: Vec<SliceEntry>,
    payload_start: usize,
}

impl Segment {
    /// Parse and verify a segment from a chunk (heap or mapped).
    pub fn from_chunk(chunk: Chunk) -> Result<Self> {
        let bytes = chunk.as_bytes();
        if bytes.len() < HEADER_SIZE + 4 + TRAILER_SIZE {
            return Err(Error::Format("segment too small".into()));
        }
        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(Error::Format(format!(
                "not a segment: expected VSEG, got {:?}",
                &bytes[0..4]
            )));
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != SEGMENT_VERSION {
            return Err(Error::VersionMismatch(format!(
                "unsupported segment version: {}",
                version
            )));
        }
        let uuid = Uuid::from_u128(u128::from_le_bytes(bytes[6..22].try_into().unwrap()));

        let trailer = &bytes[bytes.len() - TRAILER_SIZE..];
        let payload_len = u32::from_le_bytes(trailer[0..4].try_into().unwrap()) as usize;
        let index_len = u32::from_le_bytes(trailer[4..8].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(trailer[8..12].try_into().unwrap());

        let body_len = bytes.len() - TRAILER_SIZE;
        if HEADER_SIZE + index_len + payload_len != body_len {
            return Err(Error::Format(format!(
                "segment section lengths do not add up: {} + {} + {} != {}",
                HEADER_SIZE, index_len, payload_len, body_len
            )));
        }
        let computed = crc32c::crc32c(&bytes[..body_len]);
        if computed != crc {
            return Err(Error::Format(format!(
                "segment checksum mismatch: stored {:08x}, computed {:08x}",
                crc, computed
            )));
        }

        let index = &bytes[HEADER_SIZE..HEADER_SIZE + index_len];
        if index.len() < 4 {
            return Err(Error::Format("segment index truncated".into()));
        }
        let n_slices = u32::from_le_bytes(index[0..4].try_into().unwrap()) as usize;
        if index.len() != 4 + n_slices * 16 {
            return Err(Error::Format("segment index length mismatch".into()));
        }
        let mut entries = Vec::with_capacity(n_slices);
        let mut next_id = 0u64;
        for i in 0..n_slices {
            let at = 4 + i * 16;
            let entry = SliceEntry {
                offset: u64::from_le_bytes(index[at..at + 8].try_into().unwrap()),
                rows: u32::from_le_bytes(index[at + 8..at + 12].try_into().unwrap()),
                byte_off: u32::from_le_bytes(index[at + 12..at + 16].try_into().unwrap()),
            };
            if entry.offset < next_id {
                return Err(Error::Format(format!(
                    "segment slice {} offset {} overlaps previous end {}",
                    i, entry.offset, next_id
                )));
            }
            next_id = entry.offset + entry.rows as u64;
            entries.push(entry);
        }

        Ok(Self {
            chunk,
            uuid,
            entries,
            payload_start: HEADER_SIZE + index_len,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn num_slices(&self) -> usize {
        self.entries.len()
    }

    pub fn rows(&self) -> u64 {
        self.entries.iter().map(|e| e.rows as u64).sum()
    }

    /// Inclusive-exclusive id range covered, if non-empty.
    pub fn id_range(&self) -> Option<(u64, u64)> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some((first.offset, last.offset + last.rows as u64))
    }

    /// Bitmap of all ids covered by this segment's slices.
    pub fn ids(&self) -> Bitmap {
        let mut bm = Bitmap::new();
        for entry in &self.entries {
            if entry.offset > bm.len() {
                bm.append_bits(false, entry.offset - bm.len());
            }
            bm.append_bits(true, entry.rows as u64);
        }
        bm
    }

    /// Decode the `i`-th slice.
    pub fn decode_slice(&self, i: usize) -> Result<TableSlice> {
        let entry = self
            .entries
            .get(i)
            .ok_or_else(|| Error::InvalidArgument(format!("no slice {}", i)))?;
        let bytes = self.chunk.as_bytes();
        let at = self.payload_start + entry.byte_off as usize;
        if at + 4 > bytes.len() - TRAILER_SIZE {
            return Err(Error::Format("slice record past payload end".into()));
        }
        let len = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
        let body = bytes
            .get(at + 4..at + 4 + len)
            .ok_or_else(|| Error::Format("slice record truncated".into()))?;
        let mut slice = TableSlice::decode(body).ctx(&format!("slice {}", i))?;
        // The index is authoritative for the id mapping.
        slice.set_offset(entry.offset);
        Ok(slice)
    }

    /// Decode the slices whose id ranges intersect `ids`. A merge walk
    /// over the bitmap's set runs and the (sorted) slice index keeps the
    /// cost linear in the number of matches.
    pub fn lookup(&self, ids: &Bitmap) -> Result<Vec<TableSlice>> {
        let mut out = Vec::new();
        let mut entry_iter = self.entries.iter().enumerate().peekable();
        let mut runs = ids.set_runs().peekable();
        while let (Some(&(i, entry)), Some(&(run_start, run_len))) =
            (entry_iter.peek(), runs.peek())
        {
            let entry_end = entry.offset + entry.rows as u64;
            let run_end = run_start + run_len;
            if entry_end <= run_start {
                entry_iter.next();
            } else if run_end <= entry.offset {
                runs.next();
            } else {
                out.push(self.decode_slice(i)?);
                entry_iter.next();
            }
        }
        Ok(out)
    }
}
