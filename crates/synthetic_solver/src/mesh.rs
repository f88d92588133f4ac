//! Cantilever strip mesh
//!
//! Two rows of nodes along X, clamped at x = 0, split into contiguous
//! parts. Connectivity never changes, so a single `TopologySnapshot` is
//! shared by every frame of a run.

use std::sync::Arc;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use contracts::{u32s_to_bytes, PartRange, StreamError, TopologySnapshot};

/// Synthetic mesh layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Strip segments along the length
    pub segments: u32,

    /// Strip length in mm
    pub length: f32,

    /// Strip width in mm
    pub width: f32,

    /// Parts the strip is split into (contiguous spans along X)
    pub part_count: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            segments: 32,
            length: 100.0,
            width: 8.0,
            part_count: 2,
        }
    }
}

impl MeshConfig {
    /// Reject layouts that cannot produce a valid strip.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.segments == 0 {
            return Err(StreamError::configuration(
                "mesh.segments",
                "strip needs at least 1 segment, got 0",
            ));
        }
        if self.part_count == 0 || self.part_count > self.segments {
            return Err(StreamError::configuration(
                "mesh.part_count",
                format!(
                    "part count must be between 1 and the segment count ({}), got {}",
                    self.segments, self.part_count
                ),
            ));
        }
        if !self.length.is_finite() || self.length <= 0.0 {
            return Err(StreamError::configuration(
                "mesh.length",
                format!("strip length must be positive, got {}", self.length),
            ));
        }
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(StreamError::configuration(
                "mesh.width",
                format!("strip width must be positive, got {}", self.width),
            ));
        }
        Ok(())
    }
}

/// A built strip: rest positions plus the shared topology snapshot
///
/// Node ids run column-major: node `2*col` is the bottom row, `2*col + 1`
/// the top row. Part vertex ranges partition the node ids exactly, so
/// per-part reductions can slice nodal arrays directly.
#[derive(Debug, Clone)]
pub struct StripMesh {
    config: MeshConfig,
    rest: Vec<Point3<f32>>,
    topology: Arc<TopologySnapshot>,
}

impl StripMesh {
    /// Build the strip for a layout.
    pub fn build(config: MeshConfig) -> Result<Self, StreamError> {
        config.validate()?;

        let columns = config.segments + 1;
        let dx = config.length / config.segments as f32;

        let mut rest = Vec::with_capacity((columns * 2) as usize);
        for col in 0..columns {
            let x = col as f32 * dx;
            rest.push(Point3::new(x, 0.0, 0.0));
            rest.push(Point3::new(x, config.width, 0.0));
        }

        let mut indices = Vec::with_capacity((config.segments * 6) as usize);
        for seg in 0..config.segments {
            let a = 2 * seg; // bottom left
            let b = a + 1; // top left
            let c = a + 2; // bottom right
            let d = a + 3; // top right
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }

        let parts = Self::split_parts(&config);
        let topology = Arc::new(TopologySnapshot {
            topo_version: 1,
            parts,
            index_buffer: u32s_to_bytes(indices),
        });
        topology.validate(rest.len() as u32)?;

        Ok(Self {
            config,
            rest,
            topology,
        })
    }

    /// Contiguous per-part segment spans; the last part takes the remainder
    /// and the final node column.
    fn split_parts(config: &MeshConfig) -> Vec<PartRange> {
        let seg_per_part = config.segments / config.part_count;
        let mut parts = Vec::with_capacity(config.part_count as usize);
        let mut index_cursor = 0u32;

        for p in 0..config.part_count {
            let first_seg = p * seg_per_part;
            let last = p + 1 == config.part_count;
            let end_seg = if last {
                config.segments
            } else {
                (p + 1) * seg_per_part
            };
            let end_col = if last { config.segments + 1 } else { end_seg };
            let seg_count = end_seg - first_seg;

            parts.push(PartRange {
                part_id: p,
                vertex_start: first_seg * 2,
                vertex_count: (end_col - first_seg) * 2,
                index_start: index_cursor,
                index_count: seg_count * 6,
            });
            index_cursor += seg_count * 6;
        }
        parts
    }

    /// Number of nodes in the strip.
    pub fn node_count(&self) -> u32 {
        self.rest.len() as u32
    }

    /// Rest position per node, in node id order.
    pub fn rest_positions(&self) -> &[Point3<f32>] {
        &self.rest
    }

    /// The shared connectivity snapshot.
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.topology.clone()
    }

    /// The layout this strip was built from.
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Static deflection shape of a tip-loaded cantilever.
    ///
    /// `xi` is the position along the strip in [0, 1]; the value is 0 at
    /// the clamped root and 1 at the tip, with zero slope at the root.
    #[inline]
    pub fn deflection_shape(xi: f32) -> f32 {
        let xi = xi.clamp(0.0, 1.0);
        0.5 * (3.0 * xi * xi - xi * xi * xi)
    }
}
