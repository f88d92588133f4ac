//! SyntheticStepper - analytic cantilever FrameStepper
//!
//! Bends the strip mesh with the cam lift curve: the tip displacement at a
//! simulation time is the follower lift, interior nodes follow the static
//! cantilever deflection shape, and strain/stress fall out of the shape's
//! curvature. Being closed-form, any step can be recomputed from (time,
//! parameters) alone, which makes seeking and rollback exact.

use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use contracts::{
    f32s_to_bytes, AggregateSection, ChannelId, ContactPair, ContactSection, Fidelity, Frame,
    FrameFlags, FrameMeta, FrameStepper, NodalArrays, ParameterSet, PartAggregates, ProbeSample,
    ProbeSection, SeekProgress, StepOutcome, StepperCheckpoint, StreamError,
};

use crate::mesh::{MeshConfig, StripMesh};
use crate::profile::{MotionProfile, ProfileParameters};

/// Sentinel part id for the cam surface, which is not meshed.
pub const CAM_SURFACE_ID: u32 = u32::MAX;

/// Half the strip thickness, used for bending strain at the outer fibre.
const HALF_THICKNESS: f32 = 1.0;

/// Young's modulus in MPa (steel, with mm/N units).
const YOUNGS_MODULUS: f32 = 200_000.0;

fn default_dt() -> f64 {
    1e-4
}

fn default_emit_contact() -> bool {
    true
}

/// Synthetic stepper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Cam profile parameters
    #[serde(default)]
    pub profile: ProfileParameters,

    /// Mesh layout
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Fixed timestep in seconds
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Emit the cam/follower contact line on full-fidelity frames
    #[serde(default = "default_emit_contact")]
    pub emit_contact: bool,

    /// Inject a one-shot divergence when this step is reached
    #[serde(default)]
    pub diverge_at: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            profile: ProfileParameters::default(),
            mesh: MeshConfig::default(),
            dt: default_dt(),
            emit_contact: default_emit_contact(),
            diverge_at: None,
        }
    }
}

impl SyntheticConfig {
    /// Reject unusable stepper configuration.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(StreamError::configuration(
                "solver.dt",
                format!("timestep must be a positive finite number, got {}", self.dt),
            ));
        }
        self.profile.validate()?;
        self.mesh.validate()
    }
}

/// Checkpoint payload: everything a frame is a function of.
///
/// All fields are 8 bytes wide, so the layout has no padding and the struct
/// can round-trip through a raw byte view.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct CheckpointPayload {
    time_s: f64,
    base_radius: f64,
    max_lift: f64,
    rise_deg: f64,
    dwell_deg: f64,
    fall_deg: f64,
    rpm: f64,
    step_index: u64,
}

/// Analytic cantilever stepper
pub struct SyntheticStepper {
    profile: MotionProfile,
    mesh: StripMesh,
    dt: f64,
    emit_contact: bool,
    diverge_at: Option<u64>,
    step_index: u64,
    time_s: f64,
    diverged: bool,
    channel_lift: ChannelId,
    channel_lift_rate: ChannelId,
    channel_tip_accel: ChannelId,
}

impl SyntheticStepper {
    /// Build a stepper from validated configuration.
    pub fn new(config: SyntheticConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            profile: MotionProfile::new(config.profile)?,
            mesh: StripMesh::build(config.mesh)?,
            dt: config.dt,
            emit_contact: config.emit_contact,
            diverge_at: config.diverge_at,
            step_index: 0,
            time_s: 0.0,
            diverged: false,
            channel_lift: ChannelId::from("lift"),
            channel_lift_rate: ChannelId::from("lift_rate"),
            channel_tip_accel: ChannelId::from("tip_accel"),
        })
    }

    /// Build a stepper with default profile, mesh, and timestep.
    pub fn with_defaults() -> Result<Self, StreamError> {
        Self::new(SyntheticConfig::default())
    }

    /// Fixed timestep in seconds.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    fn guard_diverged(&self) -> Result<(), StreamError> {
        if self.diverged {
            return Err(StreamError::divergence(
                self.step_index,
                "stepper is diverged; restore a checkpoint before stepping",
            ));
        }
        Ok(())
    }

    fn produce_frame(&self, fidelity: Fidelity) -> Result<Frame, StreamError> {
        let (lift, lift_rate, tip_accel) = self.profile.kinematics_at(self.time_s);
        let lift = lift as f32;
        let rest = self.mesh.rest_positions();
        let length = self.mesh.config().length;

        let disp: Vec<Vector3<f32>> = rest
            .iter()
            .map(|node| {
                Vector3::new(
                    0.0,
                    0.0,
                    lift * StripMesh::deflection_shape(node.x / length),
                )
            })
            .collect();

        let mut nodal = NodalArrays::from_displacements(
            disp.iter().map(|d| d.x).collect(),
            disp.iter().map(|d| d.y).collect(),
            disp.iter().map(|d| d.z).collect(),
        )?;

        let mut flags = FrameFlags::empty();
        let mut contact = None;
        let mut probes = None;
        let mut aggregates = None;

        match fidelity {
            Fidelity::Preview => {
                flags.insert(FrameFlags::PREVIEW);
            }
            Fidelity::Full => {
                let (rotations, strains, stresses) = self.bending_fields(lift);
                aggregates = Some(self.reduce_aggregates(&stresses, &disp));
                nodal.rotations = Some(f32s_to_bytes(rotations));
                nodal.strains = Some(f32s_to_bytes(strains));
                nodal.stresses = Some(f32s_to_bytes(stresses));

                probes = Some(ProbeSection {
                    samples: vec![
                        ProbeSample {
                            channel: self.channel_lift.clone(),
                            value: lift as f64,
                        },
                        ProbeSample {
                            channel: self.channel_lift_rate.clone(),
                            value: lift_rate,
                        },
                        ProbeSample {
                            channel: self.channel_tip_accel.clone(),
                            value: tip_accel,
                        },
                    ],
                });
                flags.insert(FrameFlags::HAS_PROBES);

                if self.emit_contact {
                    contact = Some(self.contact_section(lift));
                    flags.insert(FrameFlags::HAS_CONTACT);
                }
            }
        }

        trace!(
            step = self.step_index,
            time_s = self.time_s,
            lift,
            "synthetic frame produced"
        );

        Ok(Frame {
            meta: FrameMeta::unsealed(self.time_s, self.step_index, flags),
            topology: self.mesh.topology(),
            nodal,
            contact,
            probes,
            aggregates,
        })
    }

    /// Rotations, strains, and stresses from the deflection shape.
    fn bending_fields(&self, lift: f32) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let rest = self.mesh.rest_positions();
        let length = self.mesh.config().length;

        let mut rotations = Vec::with_capacity(rest.len() * 3);
        let mut strains = Vec::with_capacity(rest.len());
        let mut stresses = Vec::with_capacity(rest.len());

        for node in rest {
            let xi = (node.x / length).clamp(0.0, 1.0);

            // Slope of the deflection shape, as rotation about Y.
            let slope = 1.5 * lift * (2.0 * xi - xi * xi) / length;
            rotations.extend_from_slice(&[0.0, -slope, 0.0]);

            // Curvature peaks at the clamped root and vanishes at the tip.
            let strain = 3.0 * lift * (1.0 - xi) * HALF_THICKNESS / (length * length);
            strains.push(strain);
            stresses.push((YOUNGS_MODULUS * strain).abs());
        }
        (rotations, strains, stresses)
    }

    fn reduce_aggregates(&self, stresses: &[f32], disp: &[Vector3<f32>]) -> AggregateSection {
        let topology = self.mesh.topology();
        let mut per_part = Vec::with_capacity(topology.parts.len());

        for part in &topology.parts {
            let start = part.vertex_start as usize;
            let end = start + part.vertex_count as usize;

            let mut min_stress = f32::MAX;
            let mut max_stress = 0.0f32;
            let mut sum_sq = 0.0f64;
            for node in start..end {
                min_stress = min_stress.min(stresses[node]);
                max_stress = max_stress.max(stresses[node]);
                sum_sq += disp[node].norm_squared() as f64;
            }

            per_part.push(PartAggregates {
                part_id: part.part_id,
                min_stress: if min_stress == f32::MAX { 0.0 } else { min_stress },
                max_stress,
                rms_displacement: (sum_sq / part.vertex_count.max(1) as f64).sqrt() as f32,
            });
        }
        AggregateSection { per_part }
    }

    /// Touch line between the follower tip and the cam surface.
    fn contact_section(&self, lift: f32) -> ContactSection {
        let config = self.mesh.config();
        let tip = Point3::new(config.length, 0.0, lift);
        let polyline = vec![tip.x, tip.y, tip.z, tip.x, config.width, tip.z];

        let tip_part = self
            .mesh
            .topology()
            .parts
            .last()
            .map(|part| part.part_id)
            .unwrap_or(0);

        ContactSection {
            pairs: vec![ContactPair {
                pair_id: 0,
                part_a: tip_part,
                part_b: CAM_SURFACE_ID,
                polyline: f32s_to_bytes(polyline),
            }],
        }
    }
}

impl FrameStepper for SyntheticStepper {
    fn name(&self) -> &str {
        "synthetic_cantilever"
    }

    fn current_time(&self) -> f64 {
        self.time_s
    }

    fn current_step(&self) -> u64 {
        self.step_index
    }

    fn parameters(&self) -> ParameterSet {
        let profile = self.profile.parameters();
        let mut params = ParameterSet::new();
        params
            .set("base_radius", profile.base_radius)
            .set("max_lift", profile.max_lift)
            .set("rise_deg", profile.rise_deg)
            .set("dwell_deg", profile.dwell_deg)
            .set("fall_deg", profile.fall_deg)
            .set("rpm", profile.rpm);
        params
    }

    fn apply_parameters(&mut self, params: &ParameterSet) -> Result<(), StreamError> {
        params.validate()?;
        let updated = self.profile.parameters().with_updates(params)?;
        self.profile = MotionProfile::new(updated)?;
        debug!(step = self.step_index, "solver parameters replaced");
        Ok(())
    }

    fn step(&mut self, fidelity: Fidelity) -> Result<StepOutcome, StreamError> {
        self.guard_diverged()?;

        let next = self.step_index + 1;
        if self.diverge_at.is_some_and(|at| next >= at) {
            // One-shot: a rollback past this point resumes cleanly.
            self.diverge_at = None;
            self.diverged = true;
            self.step_index = next;
            self.time_s += self.dt;
            debug!(step = next, "injected divergence fired");
            return Err(StreamError::divergence(
                next,
                "injected divergence: residual exceeded limit",
            ));
        }

        self.step_index = next;
        self.time_s += self.dt;
        Ok(StepOutcome::Frame(self.produce_frame(fidelity)?))
    }

    fn seek_chunk(
        &mut self,
        time_s: f64,
        stride: u32,
        fidelity: Fidelity,
    ) -> Result<SeekProgress, StreamError> {
        self.guard_diverged()?;

        let target = (time_s.max(0.0) / self.dt).round() as u64;
        let stride = stride.max(1) as u64;

        if target > self.step_index {
            self.step_index = (self.step_index + stride).min(target);
        } else {
            self.step_index = self.step_index.saturating_sub(stride).max(target);
        }
        self.time_s = self.step_index as f64 * self.dt;

        Ok(SeekProgress {
            frame: self.produce_frame(fidelity)?,
            reached: self.step_index == target,
        })
    }

    fn refine_to(&mut self, time_s: f64) -> Result<Frame, StreamError> {
        self.guard_diverged()?;

        let time = time_s.max(0.0);
        self.step_index = (time / self.dt).round() as u64;
        self.time_s = time;
        self.produce_frame(Fidelity::Full)
    }

    fn checkpoint(&self) -> StepperCheckpoint {
        let params = self.profile.parameters();
        let payload = CheckpointPayload {
            time_s: self.time_s,
            base_radius: params.base_radius,
            max_lift: params.max_lift,
            rise_deg: params.rise_deg,
            dwell_deg: params.dwell_deg,
            fall_deg: params.fall_deg,
            rpm: params.rpm,
            step_index: self.step_index,
        };
        StepperCheckpoint {
            step_index: self.step_index,
            time_s: self.time_s,
            payload: Bytes::copy_from_slice(bytemuck::bytes_of(&payload)),
        }
    }

    fn restore(&mut self, checkpoint: &StepperCheckpoint) -> Result<(), StreamError> {
        let payload: CheckpointPayload =
            bytemuck::try_pod_read_unaligned(checkpoint.payload.as_ref()).map_err(|e| {
                StreamError::stepper_fault(format!(
                    "checkpoint payload is not a synthetic stepper snapshot: {e}"
                ))
            })?;

        self.profile = MotionProfile::new(ProfileParameters {
            base_radius: payload.base_radius,
            max_lift: payload.max_lift,
            rise_deg: payload.rise_deg,
            dwell_deg: payload.dwell_deg,
            fall_deg: payload.fall_deg,
            rpm: payload.rpm,
        })?;
        self.step_index = payload.step_index;
        self.time_s = payload.time_s;
        self.diverged = false;

        debug!(step = payload.step_index, "stepper state restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_frame(stepper: &mut SyntheticStepper, fidelity: Fidelity) -> Frame {
        match stepper.step(fidelity).unwrap() {
            StepOutcome::Frame(frame) => frame,
            StepOutcome::Finished => panic!("synthetic stepper never finishes"),
        }
    }

    #[test]
    fn steps_advance_monotonically() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        assert_eq!(stepper.current_step(), 0);

        let first = step_frame(&mut stepper, Fidelity::Full);
        let second = step_frame(&mut stepper, Fidelity::Full);

        assert_eq!(first.meta.step_index, 1);
        assert_eq!(second.meta.step_index, 2);
        assert!(second.meta.time_s > first.meta.time_s);
        assert_eq!(stepper.current_step(), 2);
        first.validate().unwrap();
    }

    #[test]
    fn full_frames_carry_probes_contact_and_aggregates() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        let frame = step_frame(&mut stepper, Fidelity::Full);

        assert!(frame.nodal.rotations.is_some());
        assert!(frame.nodal.strains.is_some());
        assert!(frame.nodal.stresses.is_some());

        let probes = frame.probes.as_ref().unwrap();
        let channels: Vec<_> = probes.samples.iter().map(|s| s.channel.as_str()).collect();
        assert_eq!(channels, ["lift", "lift_rate", "tip_accel"]);

        let aggregates = frame.aggregates.as_ref().unwrap();
        assert_eq!(aggregates.per_part.len(), 2);
        // Bending strain peaks at the root, so the root part carries the
        // higher stress.
        assert!(aggregates.per_part[0].max_stress >= aggregates.per_part[1].max_stress);

        assert!(frame.contact.is_some());
        assert!(frame.meta.flags.contains(FrameFlags::HAS_CONTACT));
        assert!(frame.meta.flags.contains(FrameFlags::HAS_PROBES));
        frame.validate().unwrap();
    }

    #[test]
    fn preview_frames_are_displacements_only() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        let frame = step_frame(&mut stepper, Fidelity::Preview);

        assert!(frame.is_preview());
        assert!(frame.nodal.rotations.is_none());
        assert!(frame.nodal.stresses.is_none());
        assert!(frame.contact.is_none());
        assert!(frame.probes.is_none());
        assert!(frame.aggregates.is_none());
        frame.validate().unwrap();
    }

    #[test]
    fn checkpoint_restore_resumes_identically() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        for _ in 0..5 {
            step_frame(&mut stepper, Fidelity::Full);
        }

        let checkpoint = stepper.checkpoint();
        assert_eq!(checkpoint.step_index, 5);

        let original = step_frame(&mut stepper, Fidelity::Full);
        step_frame(&mut stepper, Fidelity::Full);

        stepper.restore(&checkpoint).unwrap();
        assert_eq!(stepper.current_step(), 5);

        let replayed = step_frame(&mut stepper, Fidelity::Full);
        assert_eq!(replayed, original);
    }

    #[test]
    fn foreign_checkpoint_payload_rejected() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        let bogus = StepperCheckpoint {
            step_index: 0,
            time_s: 0.0,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        let err = stepper.restore(&bogus).unwrap_err();
        assert!(err.to_string().contains("checkpoint"), "got: {err}");
    }

    #[test]
    fn parameter_update_changes_the_motion() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();

        // 0.006 s at 3000 rpm is 108 cam degrees: mid-dwell, lift held at
        // max lift.
        let frame = stepper.refine_to(0.006).unwrap();
        let lift = frame.probes.as_ref().unwrap().samples[0].value;
        assert!((lift - 10.0).abs() < 1e-9);

        let mut update = ParameterSet::new();
        update.set("max_lift", 20.0);
        stepper.apply_parameters(&update).unwrap();

        let frame = stepper.refine_to(0.006).unwrap();
        let lift = frame.probes.as_ref().unwrap().samples[0].value;
        assert!((lift - 20.0).abs() < 1e-9);
    }

    #[test]
    fn injected_divergence_fires_once() {
        let mut stepper = SyntheticStepper::new(SyntheticConfig {
            diverge_at: Some(3),
            ..SyntheticConfig::default()
        })
        .unwrap();

        step_frame(&mut stepper, Fidelity::Full);
        step_frame(&mut stepper, Fidelity::Full);
        let checkpoint = stepper.checkpoint();

        let err = stepper.step(Fidelity::Full).unwrap_err();
        assert!(err.to_string().contains("step 3"), "got: {err}");

        // Still diverged until a restore.
        assert!(stepper.step(Fidelity::Full).is_err());

        stepper.restore(&checkpoint).unwrap();
        let frame = step_frame(&mut stepper, Fidelity::Full);
        assert_eq!(frame.meta.step_index, 3);
    }

    #[test]
    fn seek_chunks_are_bounded() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        let dt = stepper.dt();
        let target = 20.0 * dt;

        let progress = stepper.seek_chunk(target, 8, Fidelity::Preview).unwrap();
        assert_eq!(stepper.current_step(), 8);
        assert!(!progress.reached);
        assert!(progress.frame.is_preview());

        stepper.seek_chunk(target, 8, Fidelity::Preview).unwrap();
        assert_eq!(stepper.current_step(), 16);

        let progress = stepper.seek_chunk(target, 8, Fidelity::Preview).unwrap();
        assert_eq!(stepper.current_step(), 20);
        assert!(progress.reached);

        // Backward seeks walk the same bounded chunks.
        let back = 4.0 * dt;
        let progress = stepper.seek_chunk(back, 8, Fidelity::Preview).unwrap();
        assert_eq!(stepper.current_step(), 12);
        assert!(!progress.reached);
        let progress = stepper.seek_chunk(back, 8, Fidelity::Preview).unwrap();
        assert_eq!(stepper.current_step(), 4);
        assert!(progress.reached);
    }

    #[test]
    fn refine_lands_exactly() {
        let mut stepper = SyntheticStepper::with_defaults().unwrap();
        let frame = stepper.refine_to(0.0012).unwrap();

        assert_eq!(stepper.current_step(), 12);
        assert_eq!(stepper.current_time(), 0.0012);
        assert_eq!(frame.meta.step_index, 12);
        assert!(!frame.is_preview());
        frame.validate().unwrap();
    }
}
