//! Coalescing scrub state: latest target wins, settle restores playback

use contracts::{QualityHint, ScrubConfig, SessionState};

/// One seek request as accepted by the API
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeekRequest {
    pub time_s: f64,
    pub hint: QualityHint,
}

/// Tracks the in-flight seek target and where playback resumes afterwards.
///
/// Requests coalesce: a new target replaces the old one outright, so a
/// scrub storm does the work of its final position rather than of every
/// position the pointer passed through.
#[derive(Debug)]
pub(crate) struct ScrubController {
    config: ScrubConfig,
    target: Option<SeekRequest>,
    /// State restored once the gesture settles
    resume: SessionState,
}

impl ScrubController {
    pub fn new(config: ScrubConfig) -> Self {
        Self {
            config,
            target: None,
            resume: SessionState::Paused,
        }
    }

    /// Steps advanced per published preview frame.
    pub fn stride(&self) -> u32 {
        self.config.coarse_stride
    }

    /// Accept the first seek of a gesture, remembering where to resume.
    pub fn begin(&mut self, request: SeekRequest, prior: SessionState) {
        if matches!(prior, SessionState::Running | SessionState::Paused) {
            self.resume = prior;
        }
        self.target = Some(request);
    }

    /// Replace the in-flight target; the resume state is kept.
    pub fn retarget(&mut self, request: SeekRequest) {
        self.target = Some(request);
    }

    /// Current target, if a seek is in flight.
    pub fn target(&self) -> Option<SeekRequest> {
        self.target
    }

    /// Claim the target for servicing; the controller goes quiet.
    pub fn take_target(&mut self) -> Option<SeekRequest> {
        self.target.take()
    }

    /// Where playback goes once the seek settles.
    pub fn resume_state(&self) -> SessionState {
        self.resume
    }

    /// A play or pause arriving mid-seek changes where settle lands.
    pub fn set_resume(&mut self, state: SessionState) {
        self.resume = state;
    }

    /// Whether a preview may be published at the current queue depth.
    ///
    /// Holding previews below `coarse_depth` keeps seek latency bounded; a
    /// skipped preview is a scrub drop, not an error.
    pub fn admit_preview(&self, queue_len: usize) -> bool {
        queue_len < self.config.coarse_depth
    }
}
