//! Frame projection - narrow a frame to a subscription's requested content

use contracts::{FieldsMask, Frame, FrameFlags, SubscriptionSpec};

/// Strip the sections a subscription did not ask for.
///
/// Cloning is cheap: topology stays behind its `Arc` and the nodal sections
/// are reference-counted byte slices, so projection only drops references
/// and never copies data.
///
/// `HAS_CONTACT`/`HAS_PROBES` flags are cleared together with their
/// sections so the projected frame still passes [`Frame::validate`]. The
/// state hash stays untouched: it identifies the source frame, and a
/// replay-equality check over a projected stream compares against the same
/// hashes the recorder saw.
pub fn project_frame(frame: &Frame, spec: &SubscriptionSpec) -> Frame {
    let mut projected = frame.clone();

    if !spec.fields.contains(FieldsMask::ROTATIONS) {
        projected.nodal.rotations = None;
    }
    if !spec.fields.contains(FieldsMask::STRAINS) {
        projected.nodal.strains = None;
    }
    if !spec.fields.contains(FieldsMask::STRESSES) {
        projected.nodal.stresses = None;
    }
    if !spec.fields.contains(FieldsMask::AGGREGATES) {
        projected.aggregates = None;
    }

    if !spec.include_contact {
        projected.contact = None;
        projected.meta.flags.remove(FrameFlags::HAS_CONTACT);
    }
    if !spec.include_probes {
        projected.probes = None;
        projected.meta.flags.remove(FrameFlags::HAS_PROBES);
    }

    projected
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use contracts::{
        f32s_to_bytes, u32s_to_bytes, AggregateSection, ChannelId, ContactPair, ContactSection,
        FrameMeta, NodalArrays, PartAggregates, PartRange, ProbeSample, ProbeSection,
        TopologySnapshot, ROTATION_COMPONENTS,
    };

    fn full_frame() -> Frame {
        let nodes = 3usize;
        let mut meta = FrameMeta::unsealed(
            0.5,
            12,
            FrameFlags::HAS_CONTACT | FrameFlags::HAS_PROBES,
        );
        meta.state_hash = [7u8; 32];

        let mut nodal =
            NodalArrays::from_displacements(vec![0.0, 0.1, 0.2], vec![0.0; nodes], vec![0.0; nodes])
                .unwrap();
        nodal.rotations = Some(f32s_to_bytes(vec![0.0; nodes * ROTATION_COMPONENTS]));
        nodal.strains = Some(f32s_to_bytes(vec![0.0; nodes]));
        nodal.stresses = Some(f32s_to_bytes(vec![1.0, 2.0, 3.0]));

        Frame {
            meta,
            topology: Arc::new(TopologySnapshot {
                topo_version: 1,
                parts: vec![PartRange {
                    part_id: 0,
                    vertex_start: 0,
                    vertex_count: nodes as u32,
                    index_start: 0,
                    index_count: 3,
                }],
                index_buffer: u32s_to_bytes(vec![0, 1, 2]),
            }),
            nodal,
            contact: Some(ContactSection {
                pairs: vec![ContactPair {
                    pair_id: 0,
                    part_a: 0,
                    part_b: 1,
                    polyline: f32s_to_bytes(vec![0.0; 6]),
                }],
            }),
            probes: Some(ProbeSection {
                samples: vec![ProbeSample {
                    channel: ChannelId::from("lift"),
                    value: 4.2,
                }],
            }),
            aggregates: Some(AggregateSection {
                per_part: vec![PartAggregates {
                    part_id: 0,
                    min_stress: 1.0,
                    max_stress: 3.0,
                    rms_displacement: 0.12,
                }],
            }),
        }
    }

    #[test]
    fn minimal_spec_drops_every_optional_section() {
        let frame = full_frame();
        let projected = project_frame(&frame, &SubscriptionSpec::new("viewer"));

        assert!(projected.nodal.rotations.is_none());
        assert!(projected.nodal.strains.is_none());
        assert!(projected.nodal.stresses.is_none());
        assert!(projected.aggregates.is_none());
        assert!(projected.contact.is_none());
        assert!(projected.probes.is_none());

        // Flags agree with section presence, so the projection validates.
        assert!(!projected.meta.flags.contains(FrameFlags::HAS_CONTACT));
        assert!(!projected.meta.flags.contains(FrameFlags::HAS_PROBES));
        projected.validate().unwrap();
    }

    #[test]
    fn full_spec_passes_everything_through() {
        let frame = full_frame();
        let spec = SubscriptionSpec::new("inspector")
            .with_fields(FieldsMask::all())
            .with_contact()
            .with_probes();

        let projected = project_frame(&frame, &spec);
        assert_eq!(projected, frame);
        projected.validate().unwrap();
    }

    #[test]
    fn projection_shares_section_storage() {
        let frame = full_frame();
        let spec = SubscriptionSpec::new("plotter").with_fields(FieldsMask::STRESSES);
        let projected = project_frame(&frame, &spec);

        // Same backing memory: projection must not copy nodal data.
        assert_eq!(
            projected.nodal.disp_x.as_ptr(),
            frame.nodal.disp_x.as_ptr()
        );
        assert_eq!(
            projected.nodal.stresses.as_ref().unwrap().as_ptr(),
            frame.nodal.stresses.as_ref().unwrap().as_ptr()
        );
        assert!(Arc::ptr_eq(&projected.topology, &frame.topology));
    }

    #[test]
    fn state_hash_survives_projection() {
        let frame = full_frame();
        let projected = project_frame(&frame, &SubscriptionSpec::new("viewer"));
        assert_eq!(projected.meta.state_hash, frame.meta.state_hash);
        assert_eq!(projected.meta.step_index, frame.meta.step_index);
    }
}
