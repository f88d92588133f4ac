//! On-wire layout constants and aligned buffer helpers
//!
//! Every multi-byte value is little-endian. Section starts are padded to
//! 8 bytes so decoded f32/u32 views are plain casts into the buffer, which
//! only works when the backing allocation itself is 8-byte aligned; the
//! helpers here guarantee that.

use bytes::{BufMut, Bytes, BytesMut};

/// First four bytes of every encoded frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FEF1";

/// Schema version written by this encoder.
pub const SCHEMA_VERSION: u16 = 1;

/// Fixed header+metadata block size (magic through section mask).
pub const HEADER_LEN: usize = 80;

/// Bytes per entry in the parts table (five u32 fields).
pub const PART_ENTRY_LEN: usize = 20;

/// Bytes per entry in the aggregates block.
pub const AGGREGATE_ENTRY_LEN: usize = 16;

/// Section presence bits stored in the header's section mask.
pub mod section {
    pub const ROTATIONS: u32 = 1 << 0;
    pub const STRAINS: u32 = 1 << 1;
    pub const STRESSES: u32 = 1 << 2;
    pub const CONTACT: u32 = 1 << 3;
    pub const PROBES: u32 = 1 << 4;
    pub const AGGREGATES: u32 = 1 << 5;

    pub const ALL: u32 = ROTATIONS | STRAINS | STRESSES | CONTACT | PROBES | AGGREGATES;
}

/// Owner wrapper exposing an 8-byte aligned allocation as raw bytes.
struct AlignedWords {
    words: Vec<u64>,
    len: usize,
}

impl AsRef<[u8]> for AlignedWords {
    fn as_ref(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }
}

/// Copy `data` into a fresh 8-byte aligned allocation.
///
/// `decode` hands out views into its input buffer, so the input must sit in
/// aligned storage; buffers produced by `encode` already are, and readers
/// pulling records off disk go through this.
pub fn aligned_copy(data: &[u8]) -> Bytes {
    if data.is_empty() {
        return Bytes::new();
    }
    let mut words = vec![0u64; data.len().div_ceil(8)];
    bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..data.len()].copy_from_slice(data);
    Bytes::from_owner(AlignedWords {
        words,
        len: data.len(),
    })
}

/// Re-home a finished scratch buffer into aligned storage.
pub fn into_aligned(buf: BytesMut) -> Bytes {
    aligned_copy(&buf)
}

/// Zero-pad `buf` up to the next 8-byte boundary.
pub fn pad_to_8(buf: &mut BytesMut) {
    while buf.len() % 8 != 0 {
        buf.put_u8(0);
    }
}

/// Next 8-byte boundary at or after `pos`.
pub fn align_up_8(pos: usize) -> usize {
    pos.div_ceil(8) * 8
}
