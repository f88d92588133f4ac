//! Session orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{RunnerConfig, StreamRunner};
pub use stats::{CaptureReport, RunStats, SubscriberReport};
