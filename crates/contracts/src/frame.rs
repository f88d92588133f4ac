//! Frame - one solver timestep's renderable/inspectable state
//!
//! Structure-of-arrays layout with shared byte sections so fan-out and
//! consumer-side views never copy nodal data.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{ChannelId, StreamError};

/// Content hash over a frame's canonical encoding (BLAKE3, 32 bytes).
pub type StateHash = [u8; 32];

/// Render a state hash as lowercase hex for logs and sidecar records.
pub fn hash_to_hex(hash: &StateHash) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Frame flag bitset
///
/// Stored as a raw `u32` so it round-trips through the binary schema
/// unchanged; unknown bits are rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// Frame carries a contact geometry section.
    pub const HAS_CONTACT: FrameFlags = FrameFlags(1 << 0);

    /// Frame carries a probe sample section.
    pub const HAS_PROBES: FrameFlags = FrameFlags(1 << 1);

    /// A stepper checkpoint was taken at this step.
    pub const IS_KEYFRAME: FrameFlags = FrameFlags(1 << 2);

    /// The solver reported divergence at this step.
    pub const DIVERGED: FrameFlags = FrameFlags(1 << 3);

    /// Reduced-fidelity frame produced during a coarse seek.
    pub const PREVIEW: FrameFlags = FrameFlags(1 << 4);

    const ALL_BITS: u32 = 0b1_1111;

    /// Empty flag set.
    pub const fn empty() -> Self {
        FrameFlags(0)
    }

    /// Raw bit representation.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits, rejecting unknown bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL_BITS != 0 {
            return None;
        }
        Some(FrameFlags(bits))
    }

    /// True if every bit of `other` is set.
    pub const fn contains(&self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: FrameFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

/// Frame metadata
///
/// The fixed-size head of every frame; everything needed to identify,
/// order, and verify a frame without touching the payload sections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Simulation time (seconds, monotonic within a run)
    pub time_s: f64,

    /// Step sequence number (strictly increasing within a run)
    pub step_index: u64,

    /// Content hash of the full frame excluding this field
    pub state_hash: StateHash,

    /// Frame flags
    pub flags: FrameFlags,
}

impl FrameMeta {
    /// Metadata with a zeroed hash, as produced before sealing.
    pub fn unsealed(time_s: f64, step_index: u64, flags: FrameFlags) -> Self {
        Self {
            time_s,
            step_index,
            state_hash: [0u8; 32],
            flags,
        }
    }
}

/// Part descriptor within a topology snapshot
///
/// Ranges index into the shared nodal arrays / index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    /// Stable part identifier
    pub part_id: u32,

    /// First node owned by this part
    pub vertex_start: u32,

    /// Number of nodes owned by this part
    pub vertex_count: u32,

    /// First index in the shared index buffer
    pub index_start: u32,

    /// Number of indices (multiple of 3, triangles)
    pub index_count: u32,
}

/// Mesh connectivity snapshot
///
/// `topo_version` only changes when connectivity changes, so consumers may
/// cache GPU-side buffers keyed by it and reuse them until the version
/// moves. A published (`parts`, `index_buffer`) pair for a given version is
/// immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologySnapshot {
    /// Connectivity version, incremented only on topology change
    pub topo_version: u32,

    /// Ordered part descriptors
    pub parts: Vec<PartRange>,

    /// Flat little-endian u32 index sequence referencing the nodal arrays
    pub index_buffer: Bytes,
}

impl TopologySnapshot {
    /// Borrow the index buffer as u32 values without copying.
    pub fn indices(&self) -> Result<&[u32], StreamError> {
        bytes_as_u32s(&self.index_buffer)
    }

    /// Check part ranges against the index buffer and a node count.
    pub fn validate(&self, node_count: u32) -> Result<(), StreamError> {
        let index_len = (self.index_buffer.len() / 4) as u32;
        for part in &self.parts {
            let vertex_end = part.vertex_start.saturating_add(part.vertex_count);
            if vertex_end > node_count {
                return Err(StreamError::corrupt(format!(
                    "part {} vertex range [{}, {}) exceeds node count {}",
                    part.part_id, part.vertex_start, vertex_end, node_count
                )));
            }
            let index_end = part.index_start.saturating_add(part.index_count);
            if index_end > index_len {
                return Err(StreamError::corrupt(format!(
                    "part {} index range [{}, {}) exceeds index buffer length {}",
                    part.part_id, part.index_start, index_end, index_len
                )));
            }
        }
        Ok(())
    }
}

/// Number of rotation components stored per node.
pub const ROTATION_COMPONENTS: usize = 3;

/// Structure-of-arrays nodal data
///
/// Each section is a contiguous little-endian f32 sequence indexed by node
/// id. Displacements are always present; the rest are populated only when
/// the producing fidelity includes them. Sections are `Bytes` so slicing a
/// sub-range is free.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodalArrays {
    /// Number of nodes each section is indexed by
    pub node_count: u32,

    /// X displacement per node
    pub disp_x: Bytes,

    /// Y displacement per node
    pub disp_y: Bytes,

    /// Z displacement per node
    pub disp_z: Bytes,

    /// Optional rotations, three components per node
    pub rotations: Option<Bytes>,

    /// Optional equivalent strain per node
    pub strains: Option<Bytes>,

    /// Optional von Mises stress per node
    pub stresses: Option<Bytes>,
}

impl NodalArrays {
    /// Build from owned displacement vectors of equal length.
    pub fn from_displacements(
        x: Vec<f32>,
        y: Vec<f32>,
        z: Vec<f32>,
    ) -> Result<Self, StreamError> {
        if x.len() != y.len() || y.len() != z.len() {
            return Err(StreamError::configuration(
                "nodal_arrays",
                format!(
                    "displacement arrays must have equal length, got {}/{}/{}",
                    x.len(),
                    y.len(),
                    z.len()
                ),
            ));
        }
        Ok(Self {
            node_count: x.len() as u32,
            disp_x: f32s_to_bytes(x),
            disp_y: f32s_to_bytes(y),
            disp_z: f32s_to_bytes(z),
            rotations: None,
            strains: None,
            stresses: None,
        })
    }

    /// Borrow X displacements without copying.
    pub fn disp_x_values(&self) -> Result<&[f32], StreamError> {
        bytes_as_f32s(&self.disp_x)
    }

    /// Borrow Y displacements without copying.
    pub fn disp_y_values(&self) -> Result<&[f32], StreamError> {
        bytes_as_f32s(&self.disp_y)
    }

    /// Borrow Z displacements without copying.
    pub fn disp_z_values(&self) -> Result<&[f32], StreamError> {
        bytes_as_f32s(&self.disp_z)
    }

    /// Borrow von Mises stresses, if present.
    pub fn stress_values(&self) -> Option<Result<&[f32], StreamError>> {
        self.stresses.as_ref().map(bytes_as_f32s)
    }

    /// Check that every section length matches `node_count`.
    pub fn validate(&self) -> Result<(), StreamError> {
        let expect = self.node_count as usize * 4;
        for (name, section) in [
            ("disp_x", &self.disp_x),
            ("disp_y", &self.disp_y),
            ("disp_z", &self.disp_z),
        ] {
            if section.len() != expect {
                return Err(StreamError::corrupt(format!(
                    "{name} has {} bytes, expected {expect} for {} nodes",
                    section.len(),
                    self.node_count
                )));
            }
        }
        if let Some(rotations) = &self.rotations {
            if rotations.len() != expect * ROTATION_COMPONENTS {
                return Err(StreamError::corrupt(format!(
                    "rotations has {} bytes, expected {} for {} nodes",
                    rotations.len(),
                    expect * ROTATION_COMPONENTS,
                    self.node_count
                )));
            }
        }
        for (name, section) in [("strains", &self.strains), ("stresses", &self.stresses)] {
            if let Some(section) = section {
                if section.len() != expect {
                    return Err(StreamError::corrupt(format!(
                        "{name} has {} bytes, expected {expect} for {} nodes",
                        section.len(),
                        self.node_count
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Contact geometry for one contact pair (polyline in world space)
#[derive(Debug, Clone, PartialEq)]
pub struct ContactPair {
    /// Stable contact pair identifier
    pub pair_id: u32,

    /// First participating part
    pub part_a: u32,

    /// Second participating part
    pub part_b: u32,

    /// Little-endian f32 (x, y, z) triples along the contact line
    pub polyline: Bytes,
}

impl ContactPair {
    /// Borrow the polyline as flat f32 coordinates.
    pub fn points(&self) -> Result<&[f32], StreamError> {
        bytes_as_f32s(&self.polyline)
    }
}

/// Contact geometry section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactSection {
    /// One entry per active contact pair
    pub pairs: Vec<ContactPair>,
}

/// One named probe sample (DOF or actuator channel)
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    /// Channel name, cheap to clone
    pub channel: ChannelId,

    /// Sampled value
    pub value: f64,
}

/// Probe sample section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSection {
    /// Samples in canonical (producer-defined) order
    pub samples: Vec<ProbeSample>,
}

/// Per-part reduction values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartAggregates {
    /// Part these aggregates were reduced over
    pub part_id: u32,

    /// Minimum von Mises stress in the part
    pub min_stress: f32,

    /// Maximum von Mises stress in the part
    pub max_stress: f32,

    /// Root-mean-square displacement magnitude in the part
    pub rms_displacement: f32,
}

/// Per-part aggregate section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSection {
    /// One entry per part, in part order
    pub per_part: Vec<PartAggregates>,
}

/// One solver timestep
///
/// Topology is shared behind an `Arc`: fan-out clones the frame per
/// subscriber without duplicating connectivity, and a consumer may hold the
/// snapshot across frames while `topo_version` is unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame metadata
    pub meta: FrameMeta,

    /// Mesh connectivity snapshot
    pub topology: Arc<TopologySnapshot>,

    /// Nodal SoA data
    pub nodal: NodalArrays,

    /// Contact geometry, present when produced and requested
    pub contact: Option<ContactSection>,

    /// Probe samples, present when produced and requested
    pub probes: Option<ProbeSection>,

    /// Per-part aggregates, present when produced and requested
    pub aggregates: Option<AggregateSection>,
}

impl Frame {
    /// True for reduced-fidelity frames published during a coarse seek.
    pub fn is_preview(&self) -> bool {
        self.meta.flags.contains(FrameFlags::PREVIEW)
    }

    /// Structural consistency check: section lengths, part ranges, and
    /// flag/section agreement.
    pub fn validate(&self) -> Result<(), StreamError> {
        self.nodal.validate()?;
        self.topology.validate(self.nodal.node_count)?;
        if self.meta.flags.contains(FrameFlags::HAS_CONTACT) != self.contact.is_some() {
            return Err(StreamError::corrupt(
                "HAS_CONTACT flag disagrees with contact section presence",
            ));
        }
        if self.meta.flags.contains(FrameFlags::HAS_PROBES) != self.probes.is_some() {
            return Err(StreamError::corrupt(
                "HAS_PROBES flag disagrees with probe section presence",
            ));
        }
        Ok(())
    }
}

/// Owner wrappers let `Bytes::from_owner` expose typed vectors as raw bytes
/// without copying and without losing the vector's natural alignment.
struct F32Owner(Vec<f32>);

impl AsRef<[u8]> for F32Owner {
    fn as_ref(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }
}

struct U32Owner(Vec<u32>);

impl AsRef<[u8]> for U32Owner {
    fn as_ref(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }
}

/// Convert an owned f32 vector into a byte section without copying.
pub fn f32s_to_bytes(values: Vec<f32>) -> Bytes {
    if values.is_empty() {
        return Bytes::new();
    }
    Bytes::from_owner(F32Owner(values))
}

/// Convert an owned u32 vector into a byte section without copying.
pub fn u32s_to_bytes(values: Vec<u32>) -> Bytes {
    if values.is_empty() {
        return Bytes::new();
    }
    Bytes::from_owner(U32Owner(values))
}

/// Borrow a byte section as f32 values without copying.
pub fn bytes_as_f32s(bytes: &Bytes) -> Result<&[f32], StreamError> {
    bytemuck::try_cast_slice(bytes.as_ref())
        .map_err(|e| StreamError::corrupt(format!("f32 section view failed: {e}")))
}

/// Borrow a byte section as u32 values without copying.
pub fn bytes_as_u32s(bytes: &Bytes) -> Result<&[u32], StreamError> {
    bytemuck::try_cast_slice(bytes.as_ref())
        .map_err(|e| StreamError::corrupt(format!("u32 section view failed: {e}")))
}
