//! CaptureWriter - streams delivered frames into an artifact directory

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use contracts::{hash_to_hex, Frame, ParameterSet, StreamError};
use frame_codec::{encode, SCHEMA_VERSION};
use tracing::{info, instrument};

use crate::manifest::{CaptureArtifact, CaptureManifest, SidecarRecord};
use crate::{ARTIFACT_VERSION, FRAMES_FILE, SIDECAR_FILE};

/// Writes one capture artifact, then finalizes its manifest.
///
/// Frames are appended in delivery order; the writer never reorders or
/// filters. Dropping the writer without calling `finish` leaves the frame
/// and sidecar files behind but no manifest, so the artifact will not open.
pub struct CaptureWriter {
    root: PathBuf,
    frames: BufWriter<File>,
    sidecar: BufWriter<File>,
    manifest: CaptureManifest,
    offset: u64,
    first_time: Option<f64>,
    last_time: f64,
}

impl CaptureWriter {
    /// Create a fresh artifact directory and open its files.
    #[instrument(name = "capture_create", skip_all)]
    pub fn create(
        dir: impl Into<PathBuf>,
        session_label: impl Into<String>,
        parameters: ParameterSet,
    ) -> Result<Self, StreamError> {
        let root = dir.into();
        fs::create_dir_all(&root)?;

        let frames = BufWriter::new(File::create(root.join(FRAMES_FILE))?);
        let sidecar = BufWriter::new(File::create(root.join(SIDECAR_FILE))?);

        let manifest = CaptureManifest {
            version: ARTIFACT_VERSION,
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now().to_rfc3339(),
            session_label: session_label.into(),
            parameters,
            frame_count: 0,
            first_step: None,
            final_step: None,
            duration_s: 0.0,
            dropped_during_capture: 0,
            parameter_updates: 0,
        };

        info!(path = %root.display(), "capture started");
        Ok(Self {
            root,
            frames,
            sidecar,
            manifest,
            offset: 0,
            first_time: None,
            last_time: 0.0,
        })
    }

    /// Append one sealed frame to the artifact.
    #[instrument(
        name = "capture_append",
        skip(self, frame),
        fields(step_index = frame.meta.step_index)
    )]
    pub fn append(&mut self, frame: &Frame) -> Result<(), StreamError> {
        let encoded = encode(frame)?;
        let len = encoded.len() as u32;

        self.frames.write_all(&len.to_le_bytes())?;
        self.frames.write_all(&encoded)?;

        let record = SidecarRecord {
            step_index: frame.meta.step_index,
            time_s: frame.meta.time_s,
            state_hash: hash_to_hex(&frame.meta.state_hash),
            offset: self.offset,
            len,
            preview: frame.is_preview(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| StreamError::Other(format!("cannot serialize sidecar record: {e}")))?;
        self.sidecar.write_all(line.as_bytes())?;
        self.sidecar.write_all(b"\n")?;

        self.offset += 4 + len as u64;
        self.manifest.frame_count += 1;
        self.manifest.first_step.get_or_insert(frame.meta.step_index);
        self.manifest.final_step = Some(frame.meta.step_index);
        self.first_time.get_or_insert(frame.meta.time_s);
        self.last_time = frame.meta.time_s;
        Ok(())
    }

    /// Record how many parameter updates were applied while the capture ran.
    pub fn set_parameter_updates(&mut self, count: u64) {
        self.manifest.parameter_updates = count;
    }

    /// Record the session-wide drop count observed while the capture ran.
    pub fn set_dropped_during_capture(&mut self, dropped: u64) {
        self.manifest.dropped_during_capture = dropped;
    }

    /// Frames appended so far.
    pub fn frame_count(&self) -> u64 {
        self.manifest.frame_count
    }

    /// Flush everything and write the final manifest.
    #[instrument(name = "capture_finish", skip(self))]
    pub fn finish(mut self) -> Result<CaptureArtifact, StreamError> {
        self.frames.flush()?;
        self.sidecar.flush()?;

        self.manifest.duration_s = match self.first_time {
            Some(first) => self.last_time - first,
            None => 0.0,
        };
        self.manifest.save(&self.root)?;

        info!(
            path = %self.root.display(),
            frames = self.manifest.frame_count,
            duration_s = self.manifest.duration_s,
            "capture finished"
        );
        Ok(CaptureArtifact::from_parts(self.root, self.manifest))
    }
}
