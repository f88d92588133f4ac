//! Frame encoder
//!
//! Canonical order: header/metadata, parts table, index buffer, nodal
//! sections, then contact, probes, aggregates. The order is fixed so the
//! state hash is reproducible across encode/decode/re-encode cycles.

use bytes::{BufMut, Bytes, BytesMut};
use contracts::{Frame, FrameFlags, StateHash, StreamError};

use crate::layout::{self, section, FRAME_MAGIC, HEADER_LEN, SCHEMA_VERSION};

/// Serialize a frame to a contiguous aligned buffer.
pub fn encode(frame: &Frame) -> Result<Bytes, StreamError> {
    frame.validate()?;
    encode_inner(frame, false)
}

/// Content hash over the canonical encoding with the hash field zeroed.
pub fn compute_state_hash(frame: &Frame) -> Result<StateHash, StreamError> {
    frame.validate()?;
    let buf = encode_inner(frame, true)?;
    Ok(*blake3::hash(&buf).as_bytes())
}

/// Stamp `state_hash` on a freshly produced frame.
pub fn seal(frame: &mut Frame) -> Result<(), StreamError> {
    frame.meta.state_hash = compute_state_hash(frame)?;
    Ok(())
}

/// Recompute the hash of a sealed frame and compare.
pub fn verify_sealed(frame: &Frame) -> Result<bool, StreamError> {
    Ok(compute_state_hash(frame)? == frame.meta.state_hash)
}

fn section_mask(frame: &Frame) -> u32 {
    let mut mask = 0;
    if frame.nodal.rotations.is_some() {
        mask |= section::ROTATIONS;
    }
    if frame.nodal.strains.is_some() {
        mask |= section::STRAINS;
    }
    if frame.nodal.stresses.is_some() {
        mask |= section::STRESSES;
    }
    if frame.contact.is_some() {
        mask |= section::CONTACT;
    }
    if frame.probes.is_some() {
        mask |= section::PROBES;
    }
    if frame.aggregates.is_some() {
        mask |= section::AGGREGATES;
    }
    mask
}

fn encode_inner(frame: &Frame, zero_hash: bool) -> Result<Bytes, StreamError> {
    let estimate = HEADER_LEN
        + frame.topology.parts.len() * layout::PART_ENTRY_LEN
        + frame.topology.index_buffer.len()
        + frame.nodal.disp_x.len() * 3
        + 256;
    let mut buf = BytesMut::with_capacity(estimate);

    // Header + metadata.
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u16_le(SCHEMA_VERSION);
    buf.put_u16_le(0);
    buf.put_f64_le(frame.meta.time_s);
    buf.put_u64_le(frame.meta.step_index);
    buf.put_u32_le(frame.meta.flags.bits());
    buf.put_u32_le(frame.topology.topo_version);
    if zero_hash {
        buf.put_slice(&[0u8; 32]);
    } else {
        buf.put_slice(&frame.meta.state_hash);
    }
    buf.put_u32_le(frame.nodal.node_count);
    buf.put_u32_le(frame.topology.parts.len() as u32);
    buf.put_u32_le((frame.topology.index_buffer.len() / 4) as u32);
    buf.put_u32_le(section_mask(frame));
    debug_assert_eq!(buf.len(), HEADER_LEN);

    // Parts table.
    for part in &frame.topology.parts {
        buf.put_u32_le(part.part_id);
        buf.put_u32_le(part.vertex_start);
        buf.put_u32_le(part.vertex_count);
        buf.put_u32_le(part.index_start);
        buf.put_u32_le(part.index_count);
    }

    layout::pad_to_8(&mut buf);
    buf.put_slice(&frame.topology.index_buffer);

    for disp in [&frame.nodal.disp_x, &frame.nodal.disp_y, &frame.nodal.disp_z] {
        layout::pad_to_8(&mut buf);
        buf.put_slice(disp);
    }

    for optional in [
        &frame.nodal.rotations,
        &frame.nodal.strains,
        &frame.nodal.stresses,
    ] {
        if let Some(bytes) = optional {
            layout::pad_to_8(&mut buf);
            buf.put_slice(bytes);
        }
    }

    if let Some(contact) = &frame.contact {
        layout::pad_to_8(&mut buf);
        buf.put_u32_le(contact.pairs.len() as u32);
        for pair in &contact.pairs {
            if pair.polyline.len() % 4 != 0 {
                return Err(StreamError::corrupt(format!(
                    "contact pair {} polyline length {} is not a multiple of 4",
                    pair.pair_id,
                    pair.polyline.len()
                )));
            }
            buf.put_u32_le(pair.pair_id);
            buf.put_u32_le(pair.part_a);
            buf.put_u32_le(pair.part_b);
            buf.put_u32_le((pair.polyline.len() / 4) as u32);
            layout::pad_to_8(&mut buf);
            buf.put_slice(&pair.polyline);
        }
    }

    if let Some(probes) = &frame.probes {
        layout::pad_to_8(&mut buf);
        buf.put_u32_le(probes.samples.len() as u32);
        for sample in &probes.samples {
            let name = sample.channel.as_str().as_bytes();
            if name.len() > u16::MAX as usize {
                return Err(StreamError::corrupt(format!(
                    "probe channel name is {} bytes, limit is {}",
                    name.len(),
                    u16::MAX
                )));
            }
            buf.put_u16_le(name.len() as u16);
            buf.put_slice(name);
            buf.put_f64_le(sample.value);
        }
    }

    if let Some(aggregates) = &frame.aggregates {
        layout::pad_to_8(&mut buf);
        buf.put_u32_le(aggregates.per_part.len() as u32);
        for entry in &aggregates.per_part {
            buf.put_u32_le(entry.part_id);
            buf.put_f32_le(entry.min_stress);
            buf.put_f32_le(entry.max_stress);
            buf.put_f32_le(entry.rms_displacement);
        }
    }

    Ok(layout::into_aligned(buf))
}

/// Flags bits validated at encode entry via `Frame::validate`; exposed for
/// decode-side symmetry checks.
pub(crate) fn flags_from_bits(bits: u32) -> Result<FrameFlags, StreamError> {
    FrameFlags::from_bits(bits)
        .ok_or_else(|| StreamError::corrupt(format!("unknown frame flag bits: {bits:#x}")))
}
