//! ReplayStepper - feeds a capture artifact back as a FrameStepper
//!
//! The whole session pipeline downstream of the driver is reused unchanged:
//! replay is just another stepper. Every frame is decoded through the same
//! codec that wrote it and its `state_hash` is recomputed; the artifact is
//! the ground truth, so a mismatch fails the step instead of the process.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use contracts::{
    hash_to_hex, Fidelity, Frame, FrameStepper, ParameterSet, SeekProgress, StepOutcome,
    StepperCheckpoint, StreamError,
};
use frame_codec::{aligned_copy, decode, verify_sealed, SCHEMA_VERSION};
use tracing::{debug, info};

use crate::manifest::{CaptureArtifact, CaptureManifest, SidecarRecord};
use crate::FRAMES_FILE;

/// Bytes of the u32 length prefix ahead of each record.
const LEN_PREFIX: usize = 4;

/// Slice one record out of `frames.bin` and decode it.
///
/// The record bytes are re-aligned into a fresh buffer first; record
/// offsets inside the file are arbitrary, and the decoder hands out typed
/// views that need an aligned base.
pub(crate) fn read_record_frame(
    frames: &Bytes,
    record: &SidecarRecord,
) -> Result<Frame, StreamError> {
    let prefix_start = record.offset as usize;
    let start = prefix_start
        .checked_add(LEN_PREFIX)
        .ok_or_else(|| StreamError::corrupt("sidecar offset overflows"))?;
    let end = start
        .checked_add(record.len as usize)
        .ok_or_else(|| StreamError::corrupt("sidecar length overflows"))?;
    if end > frames.len() {
        return Err(StreamError::corrupt(format!(
            "record at offset {} extends past the end of {FRAMES_FILE}",
            record.offset
        )));
    }

    let mut prefix = [0u8; LEN_PREFIX];
    prefix.copy_from_slice(&frames[prefix_start..start]);
    let stored_len = u32::from_le_bytes(prefix);
    if stored_len != record.len {
        return Err(StreamError::corrupt(format!(
            "length prefix {} disagrees with sidecar length {}",
            stored_len, record.len
        )));
    }

    decode(aligned_copy(&frames[start..end]))
}

/// Recompute the frame hash and compare it against the recorded one.
pub(crate) fn verify_recorded_hash(
    frame: &Frame,
    record: &SidecarRecord,
) -> Result<bool, StreamError> {
    Ok(verify_sealed(frame)? && hash_to_hex(&frame.meta.state_hash) == record.state_hash)
}

/// Replays a capture artifact as a deterministic frame stream.
///
/// No wall-clock pacing: frames come out as fast as the driver pulls them.
/// The requested fidelity is ignored; frames replay exactly as recorded,
/// previews included.
#[derive(Debug)]
pub struct ReplayStepper {
    root: PathBuf,
    manifest: CaptureManifest,
    frames: Bytes,
    records: Vec<SidecarRecord>,
    position: usize,
    last_step: Option<u64>,
    step_index: u64,
    time_s: f64,
}

impl ReplayStepper {
    /// Open an artifact and load its index.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StreamError> {
        let artifact = CaptureArtifact::open(dir.as_ref())?;
        let manifest = artifact.manifest().clone();

        if manifest.schema_version != SCHEMA_VERSION {
            return Err(StreamError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: manifest.schema_version,
            });
        }

        let records = artifact.read_sidecar()?;
        if records.len() as u64 != manifest.frame_count {
            return Err(StreamError::corrupt(format!(
                "sidecar holds {} records but the manifest says {}",
                records.len(),
                manifest.frame_count
            )));
        }

        let frames = Bytes::from(std::fs::read(artifact.root().join(FRAMES_FILE))?);

        info!(
            path = %artifact.root().display(),
            frames = records.len(),
            "replay artifact opened"
        );
        Ok(Self {
            root: artifact.root().to_path_buf(),
            manifest,
            frames,
            records,
            position: 0,
            last_step: None,
            step_index: 0,
            time_s: 0.0,
        })
    }

    /// Manifest of the artifact being replayed.
    pub fn manifest(&self) -> &CaptureManifest {
        &self.manifest
    }

    /// Total recorded frames.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True for an empty recording.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn decode_verified(&self, index: usize) -> Result<Frame, StreamError> {
        let record = &self.records[index];
        let frame = read_record_frame(&self.frames, record)?;
        if !verify_recorded_hash(&frame, record)? {
            return Err(StreamError::ReplayHashMismatch {
                step_index: record.step_index,
            });
        }
        Ok(frame)
    }

    /// Index of the first record at or after `time_s`, clamped to the last.
    fn target_index(&self, time_s: f64) -> usize {
        let last = self.records.len() - 1;
        self.records
            .partition_point(|record| record.time_s < time_s)
            .min(last)
    }

    fn require_frames(&self, operation: &str) -> Result<(), StreamError> {
        if self.records.is_empty() {
            return Err(StreamError::stepper_fault(format!(
                "cannot {operation}: capture at {} holds no frames",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn land_on(&mut self, index: usize) -> Result<Frame, StreamError> {
        let frame = self.decode_verified(index)?;
        self.position = index + 1;
        // Scrubbing may move backward; order enforcement restarts here.
        self.last_step = None;
        self.step_index = frame.meta.step_index;
        self.time_s = frame.meta.time_s;
        Ok(frame)
    }
}

impl FrameStepper for ReplayStepper {
    fn name(&self) -> &str {
        "capture_replay"
    }

    fn current_time(&self) -> f64 {
        self.time_s
    }

    fn current_step(&self) -> u64 {
        self.step_index
    }

    fn parameters(&self) -> ParameterSet {
        self.manifest.parameters.clone()
    }

    fn apply_parameters(&mut self, _params: &ParameterSet) -> Result<(), StreamError> {
        Err(StreamError::stepper_fault(
            "replay stream is read-only; parameters cannot change",
        ))
    }

    fn step(&mut self, _fidelity: Fidelity) -> Result<StepOutcome, StreamError> {
        if self.position >= self.records.len() {
            return Ok(StepOutcome::Finished);
        }

        let frame = self.decode_verified(self.position)?;
        if let Some(prev) = self.last_step {
            if frame.meta.step_index < prev {
                return Err(StreamError::ReplayOutOfOrder {
                    prev,
                    next: frame.meta.step_index,
                });
            }
        }

        self.position += 1;
        self.last_step = Some(frame.meta.step_index);
        self.step_index = frame.meta.step_index;
        self.time_s = frame.meta.time_s;
        Ok(StepOutcome::Frame(frame))
    }

    fn seek_chunk(
        &mut self,
        time_s: f64,
        stride: u32,
        _fidelity: Fidelity,
    ) -> Result<SeekProgress, StreamError> {
        self.require_frames("seek")?;

        let target = self.target_index(time_s);
        let last = self.records.len() - 1;
        let current = self.position.saturating_sub(1).min(last);
        let stride = stride.max(1) as usize;

        let landed = if target > current {
            (current + stride).min(target)
        } else {
            current.saturating_sub(stride).max(target)
        };

        debug!(current, landed, target, "replay seek chunk");
        Ok(SeekProgress {
            frame: self.land_on(landed)?,
            reached: landed == target,
        })
    }

    fn refine_to(&mut self, time_s: f64) -> Result<Frame, StreamError> {
        self.require_frames("refine")?;
        let target = self.target_index(time_s);
        self.land_on(target)
    }

    fn checkpoint(&self) -> StepperCheckpoint {
        StepperCheckpoint {
            step_index: self.step_index,
            time_s: self.time_s,
            payload: Bytes::copy_from_slice(&(self.position as u64).to_le_bytes()),
        }
    }

    fn restore(&mut self, checkpoint: &StepperCheckpoint) -> Result<(), StreamError> {
        let payload: [u8; 8] = checkpoint
            .payload
            .as_ref()
            .try_into()
            .map_err(|_| StreamError::stepper_fault("checkpoint payload is not a replay cursor"))?;

        let position = (u64::from_le_bytes(payload) as usize).min(self.records.len());
        self.position = position;
        self.last_step = None;
        match position.checked_sub(1).and_then(|i| self.records.get(i)) {
            Some(record) => {
                self.step_index = record.step_index;
                self.time_s = record.time_s;
            }
            None => {
                self.step_index = 0;
                self.time_s = 0.0;
            }
        }
        Ok(())
    }
}
