//! Frame decoder
//!
//! Yields views, not copies: nodal sections, the index buffer, and contact
//! polylines are `Bytes` slices into the input buffer. Variable-length
//! pieces (probe names/values, aggregate entries) are parsed out since they
//! are small and carry no alignment guarantee.

use std::sync::Arc;

use bytes::Bytes;
use contracts::{
    AggregateSection, ContactPair, ContactSection, Frame, FrameMeta, NodalArrays, PartAggregates,
    PartRange, ProbeSample, ProbeSection, StreamError, TopologySnapshot, ROTATION_COMPONENTS,
};

use crate::encode::flags_from_bits;
use crate::layout::{self, section, FRAME_MAGIC, HEADER_LEN, SCHEMA_VERSION};

struct Reader {
    buf: Bytes,
    pos: usize,
}

impl Reader {
    fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, len: usize) -> Result<(), StreamError> {
        if self.pos + len > self.buf.len() {
            return Err(StreamError::corrupt(format!(
                "frame truncated: need {} bytes at offset {}, buffer has {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        self.need(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn get_u16_le(&mut self) -> Result<u16, StreamError> {
        Ok(u16::from_le_bytes(self.get_array()?))
    }

    fn get_u32_le(&mut self) -> Result<u32, StreamError> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    fn get_u64_le(&mut self) -> Result<u64, StreamError> {
        Ok(u64::from_le_bytes(self.get_array()?))
    }

    fn get_f64_le(&mut self) -> Result<f64, StreamError> {
        Ok(f64::from_le_bytes(self.get_array()?))
    }

    /// Zero-copy view of the next `len` bytes.
    fn slice(&mut self, len: usize) -> Result<Bytes, StreamError> {
        self.need(len)?;
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    fn align_8(&mut self) -> Result<(), StreamError> {
        let target = layout::align_up_8(self.pos);
        self.need(target - self.pos)?;
        self.pos = target;
        Ok(())
    }

    fn exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}

/// Decode one frame from an aligned buffer.
///
/// Buffers produced by `encode` are aligned already; buffers pulled from a
/// file or the network should be re-homed with `layout::aligned_copy`
/// first, or f32 views will fail at use time.
pub fn decode(buf: Bytes) -> Result<Frame, StreamError> {
    let mut reader = Reader::new(buf);

    let magic = reader.get_array::<4>()?;
    if magic != FRAME_MAGIC {
        return Err(StreamError::corrupt(format!(
            "bad frame magic: {magic:02x?}"
        )));
    }
    let version = reader.get_u16_le()?;
    if version != SCHEMA_VERSION {
        return Err(StreamError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found: version,
        });
    }
    let _reserved = reader.get_u16_le()?;

    let time_s = reader.get_f64_le()?;
    let step_index = reader.get_u64_le()?;
    let flags = flags_from_bits(reader.get_u32_le()?)?;
    let topo_version = reader.get_u32_le()?;
    let state_hash = reader.get_array::<32>()?;
    let node_count = reader.get_u32_le()?;
    let part_count = reader.get_u32_le()?;
    let index_count = reader.get_u32_le()?;
    let mask = reader.get_u32_le()?;
    if mask & !section::ALL != 0 {
        return Err(StreamError::corrupt(format!(
            "unknown section mask bits: {mask:#x}"
        )));
    }
    debug_assert_eq!(reader.pos, HEADER_LEN);

    reader.need(part_count as usize * layout::PART_ENTRY_LEN)?;
    let mut parts = Vec::with_capacity(part_count as usize);
    for _ in 0..part_count {
        parts.push(PartRange {
            part_id: reader.get_u32_le()?,
            vertex_start: reader.get_u32_le()?,
            vertex_count: reader.get_u32_le()?,
            index_start: reader.get_u32_le()?,
            index_count: reader.get_u32_le()?,
        });
    }

    reader.align_8()?;
    let index_buffer = reader.slice(index_count as usize * 4)?;

    let section_len = node_count as usize * 4;
    reader.align_8()?;
    let disp_x = reader.slice(section_len)?;
    reader.align_8()?;
    let disp_y = reader.slice(section_len)?;
    reader.align_8()?;
    let disp_z = reader.slice(section_len)?;

    let mut nodal = NodalArrays {
        node_count,
        disp_x,
        disp_y,
        disp_z,
        rotations: None,
        strains: None,
        stresses: None,
    };
    if mask & section::ROTATIONS != 0 {
        reader.align_8()?;
        nodal.rotations = Some(reader.slice(section_len * ROTATION_COMPONENTS)?);
    }
    if mask & section::STRAINS != 0 {
        reader.align_8()?;
        nodal.strains = Some(reader.slice(section_len)?);
    }
    if mask & section::STRESSES != 0 {
        reader.align_8()?;
        nodal.stresses = Some(reader.slice(section_len)?);
    }

    let contact = if mask & section::CONTACT != 0 {
        reader.align_8()?;
        let pair_count = reader.get_u32_le()?;
        reader.need(pair_count as usize * 16)?;
        let mut pairs = Vec::with_capacity(pair_count as usize);
        for _ in 0..pair_count {
            let pair_id = reader.get_u32_le()?;
            let part_a = reader.get_u32_le()?;
            let part_b = reader.get_u32_le()?;
            let point_floats = reader.get_u32_le()?;
            reader.align_8()?;
            let polyline = reader.slice(point_floats as usize * 4)?;
            pairs.push(ContactPair {
                pair_id,
                part_a,
                part_b,
                polyline,
            });
        }
        Some(ContactSection { pairs })
    } else {
        None
    };

    let probes = if mask & section::PROBES != 0 {
        reader.align_8()?;
        let sample_count = reader.get_u32_le()?;
        reader.need(sample_count as usize * 10)?;
        let mut samples = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let name_len = reader.get_u16_le()? as usize;
            let name_bytes = reader.slice(name_len)?;
            let name = std::str::from_utf8(&name_bytes)
                .map_err(|_| StreamError::corrupt("probe channel name is not valid UTF-8"))?;
            let channel = name.into();
            let value = reader.get_f64_le()?;
            samples.push(ProbeSample { channel, value });
        }
        Some(ProbeSection { samples })
    } else {
        None
    };

    let aggregates = if mask & section::AGGREGATES != 0 {
        reader.align_8()?;
        let entry_count = reader.get_u32_le()?;
        reader.need(entry_count as usize * layout::AGGREGATE_ENTRY_LEN)?;
        let mut per_part = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            per_part.push(PartAggregates {
                part_id: reader.get_u32_le()?,
                min_stress: f32::from_le_bytes(reader.get_array()?),
                max_stress: f32::from_le_bytes(reader.get_array()?),
                rms_displacement: f32::from_le_bytes(reader.get_array()?),
            });
        }
        Some(AggregateSection { per_part })
    } else {
        None
    };

    if !reader.exhausted() {
        return Err(StreamError::corrupt(format!(
            "{} trailing bytes after last section",
            reader.buf.len() - reader.pos
        )));
    }

    let frame = Frame {
        meta: FrameMeta {
            time_s,
            step_index,
            state_hash,
            flags,
        },
        topology: Arc::new(TopologySnapshot {
            topo_version,
            parts,
            index_buffer,
        }),
        nodal,
        contact,
        probes,
        aggregates,
    };
    frame.validate()?;
    Ok(frame)
}
