//! Capture manifest and sidecar records

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use contracts::{ParameterSet, StreamError};
use serde::{Deserialize, Serialize};

use crate::{MANIFEST_FILE, SIDECAR_FILE};

/// Capture session manifest, finalized by `CaptureWriter::finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureManifest {
    /// Artifact layout version
    pub version: u32,

    /// Frame encoding schema version the frames were written with
    pub schema_version: u16,

    /// RFC 3339 creation timestamp
    pub created_at: String,

    /// Session label the capture was taken from
    pub session_label: String,

    /// Active solver parameters when the capture began
    pub parameters: ParameterSet,

    /// Recorded frame count
    pub frame_count: u64,

    /// First recorded step, if any frame was recorded
    pub first_step: Option<u64>,

    /// Last recorded step, if any frame was recorded
    pub final_step: Option<u64>,

    /// Simulation-time span covered by the recording
    pub duration_s: f64,

    /// Frames the session dropped (all queues) while the capture ran
    pub dropped_during_capture: u64,

    /// Parameter updates applied while the capture ran
    pub parameter_updates: u64,
}

impl CaptureManifest {
    /// Load `manifest.json` from an artifact directory.
    pub fn load(dir: &Path) -> Result<Self, StreamError> {
        let path = dir.join(MANIFEST_FILE);
        let file = File::open(&path).map_err(|e| {
            StreamError::Other(format!("cannot open {}: {e}", path.display()))
        })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| StreamError::corrupt(format!("manifest is not valid JSON: {e}")))
    }

    /// Write `manifest.json` into an artifact directory.
    pub fn save(&self, dir: &Path) -> Result<(), StreamError> {
        let file = File::create(dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| StreamError::Other(format!("cannot serialize manifest: {e}")))
    }
}

/// One line of `frames.jsonl`.
///
/// `offset` points at the record's u32 length prefix inside `frames.bin`;
/// the encoded frame follows it and is `len` bytes long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarRecord {
    /// Step index of the recorded frame
    pub step_index: u64,

    /// Simulation time of the recorded frame
    pub time_s: f64,

    /// Lowercase hex `state_hash` as recorded
    pub state_hash: String,

    /// Byte offset of the length prefix in `frames.bin`
    pub offset: u64,

    /// Encoded frame length in bytes
    pub len: u32,

    /// True if the frame was a preview (seek scrubbing)
    pub preview: bool,
}

/// Handle to a finalized capture directory.
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    root: PathBuf,
    manifest: CaptureManifest,
}

impl CaptureArtifact {
    /// Open an existing artifact by loading its manifest.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StreamError> {
        let root = dir.into();
        let manifest = CaptureManifest::load(&root)?;
        Ok(Self { root, manifest })
    }

    pub(crate) fn from_parts(root: PathBuf, manifest: CaptureManifest) -> Self {
        Self { root, manifest }
    }

    /// Artifact directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finalized manifest.
    pub fn manifest(&self) -> &CaptureManifest {
        &self.manifest
    }

    /// Read every sidecar record, in recorded order.
    pub fn read_sidecar(&self) -> Result<Vec<SidecarRecord>, StreamError> {
        let path = self.root.join(SIDECAR_FILE);
        let file = File::open(&path).map_err(|e| {
            StreamError::Other(format!("cannot open {}: {e}", path.display()))
        })?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: SidecarRecord = serde_json::from_str(&line)
                .map_err(|e| StreamError::corrupt(format!("bad sidecar line: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_json() {
        let mut params = ParameterSet::new();
        params.set("rpm", 1500.0).set("max_lift", 12.5);

        let manifest = CaptureManifest {
            version: crate::ARTIFACT_VERSION,
            schema_version: frame_codec::SCHEMA_VERSION,
            created_at: "2026-08-25T12:00:00+00:00".to_string(),
            session_label: "bench".to_string(),
            parameters: params,
            frame_count: 120,
            first_step: Some(1),
            final_step: Some(120),
            duration_s: 0.0119,
            dropped_during_capture: 3,
            parameter_updates: 1,
        };

        let dir = tempfile::tempdir().unwrap();
        manifest.save(dir.path()).unwrap();
        let loaded = CaptureManifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CaptureManifest::load(dir.path()).is_err());
    }
}
