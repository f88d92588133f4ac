//! Standalone artifact verification
//!
//! Walks a capture directory without a session: decodes every record,
//! recomputes every hash, and checks the step sequence. Findings are
//! collected rather than failed on, so one pass reports everything.

use std::path::Path;

use bytes::Bytes;
use contracts::StreamError;
use frame_codec::SCHEMA_VERSION;
use tracing::{info, instrument, warn};

use crate::manifest::{CaptureArtifact, CaptureManifest};
use crate::replay::{read_record_frame, verify_recorded_hash};
use crate::FRAMES_FILE;

/// Everything one verification pass found.
#[derive(Debug)]
pub struct VerifyReport {
    /// Manifest of the verified artifact
    pub manifest: CaptureManifest,

    /// Records that decoded successfully
    pub frames_checked: u64,

    /// Steps whose recomputed hash differs from the recorded one
    pub hash_mismatches: Vec<u64>,

    /// Step regressions, as (previous, offending) pairs
    pub order_violations: Vec<(u64, u64)>,

    /// Records that failed to decode, with positions
    pub structural_errors: Vec<String>,
}

impl VerifyReport {
    /// True when the artifact verified without findings.
    pub fn is_clean(&self) -> bool {
        self.hash_mismatches.is_empty()
            && self.order_violations.is_empty()
            && self.structural_errors.is_empty()
    }
}

/// Verify a capture artifact end to end.
///
/// Returns `Err` only when the artifact cannot be read at all (missing
/// files, unparseable manifest, schema skew); per-record findings land in
/// the report.
#[instrument(name = "verify_artifact", skip_all, fields(path = %dir.display()))]
pub fn verify_artifact(dir: &Path) -> Result<VerifyReport, StreamError> {
    let artifact = CaptureArtifact::open(dir)?;
    let manifest = artifact.manifest().clone();

    if manifest.schema_version != SCHEMA_VERSION {
        return Err(StreamError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found: manifest.schema_version,
        });
    }

    let records = artifact.read_sidecar()?;
    let frames = Bytes::from(std::fs::read(artifact.root().join(FRAMES_FILE))?);

    let mut report = VerifyReport {
        manifest,
        frames_checked: 0,
        hash_mismatches: Vec::new(),
        order_violations: Vec::new(),
        structural_errors: Vec::new(),
    };

    if records.len() as u64 != report.manifest.frame_count {
        report.structural_errors.push(format!(
            "sidecar holds {} records but the manifest says {}",
            records.len(),
            report.manifest.frame_count
        ));
    }

    let mut prev_step: Option<u64> = None;
    for (position, record) in records.iter().enumerate() {
        let frame = match read_record_frame(&frames, record) {
            Ok(frame) => frame,
            Err(e) => {
                report
                    .structural_errors
                    .push(format!("record {position} (step {}): {e}", record.step_index));
                continue;
            }
        };
        report.frames_checked += 1;

        match verify_recorded_hash(&frame, record) {
            Ok(true) => {}
            Ok(false) => report.hash_mismatches.push(record.step_index),
            Err(e) => report
                .structural_errors
                .push(format!("record {position} (step {}): {e}", record.step_index)),
        }

        if let Some(prev) = prev_step {
            if frame.meta.step_index < prev {
                report.order_violations.push((prev, frame.meta.step_index));
            }
        }
        prev_step = Some(frame.meta.step_index);
    }

    if report.is_clean() {
        info!(frames = report.frames_checked, "artifact verified");
    } else {
        warn!(
            frames = report.frames_checked,
            hash_mismatches = report.hash_mismatches.len(),
            order_violations = report.order_violations.len(),
            structural_errors = report.structural_errors.len(),
            "artifact verification found problems"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contracts::{
        u32s_to_bytes, Frame, FrameFlags, FrameMeta, NodalArrays, ParameterSet, PartRange,
        TopologySnapshot,
    };
    use frame_codec::seal;

    use crate::writer::CaptureWriter;
    use crate::SIDECAR_FILE;

    use super::*;

    fn sealed_frame(step_index: u64) -> Frame {
        let mut frame = Frame {
            meta: FrameMeta::unsealed(step_index as f64 * 1e-4, step_index, FrameFlags::empty()),
            topology: Arc::new(TopologySnapshot {
                topo_version: 1,
                parts: vec![PartRange {
                    part_id: 0,
                    vertex_start: 0,
                    vertex_count: 3,
                    index_start: 0,
                    index_count: 3,
                }],
                index_buffer: u32s_to_bytes(vec![0, 1, 2]),
            }),
            nodal: NodalArrays::from_displacements(
                vec![step_index as f32; 3],
                vec![0.0; 3],
                vec![0.0; 3],
            )
            .unwrap(),
            contact: None,
            probes: None,
            aggregates: None,
        };
        seal(&mut frame).unwrap();
        frame
    }

    fn write_steps(dir: &Path, steps: impl IntoIterator<Item = u64>) {
        let mut writer = CaptureWriter::create(dir, "verify", ParameterSet::new()).unwrap();
        for step in steps {
            writer.append(&sealed_frame(step)).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn order_regressions_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_steps(dir.path(), [2u64, 4, 3, 5]);

        let report = verify_artifact(dir.path()).unwrap();
        assert_eq!(report.frames_checked, 4);
        assert_eq!(report.order_violations, vec![(4, 3)]);
        assert!(report.hash_mismatches.is_empty());
        assert!(!report.is_clean());
    }

    #[test]
    fn truncated_frames_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_steps(dir.path(), 1..=3);

        // Chop the last record in half.
        let path = dir.path().join(FRAMES_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 20]).unwrap();

        let report = verify_artifact(dir.path()).unwrap();
        assert_eq!(report.frames_checked, 2);
        assert_eq!(report.structural_errors.len(), 1);
        assert!(
            report.structural_errors[0].contains("step 3"),
            "got: {:?}",
            report.structural_errors
        );
    }

    #[test]
    fn missing_sidecar_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        write_steps(dir.path(), 1..=2);
        std::fs::remove_file(dir.path().join(SIDECAR_FILE)).unwrap();
        assert!(verify_artifact(dir.path()).is_err());
    }
}
