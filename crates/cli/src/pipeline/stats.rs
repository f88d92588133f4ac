//! Run statistics and summary printing.

use std::path::PathBuf;
use std::time::Duration;

use contracts::{ErrorInfo, TimingStats};

/// Statistics from a session run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Total frames sealed and published by the driver
    pub frames_produced: u64,

    /// Total frames dropped across the production queue and all subscribers
    pub frames_dropped: u64,

    /// Step index the solver reached
    pub final_step: u64,

    /// Simulation time the solver reached (seconds)
    pub sim_time_s: f64,

    /// Wall-clock duration of the run
    pub duration: Duration,

    /// Solver step wall time distribution
    pub solver_dt: TimingStats,

    /// Per-subscriber delivery tallies
    pub subscribers: Vec<SubscriberReport>,

    /// Capture artifact written during the run, if any
    pub capture: Option<CaptureReport>,

    /// Error the session ended in, if it diverged or faulted
    pub fault: Option<ErrorInfo>,
}

/// What one subscriber saw over the run
#[derive(Debug, Clone)]
pub struct SubscriberReport {
    /// Subscription label
    pub label: String,

    /// Frames popped from the private queue
    pub delivered: u64,

    /// Frames this subscriber's queue dropped
    pub dropped: u64,

    /// Reduced-fidelity preview frames among those delivered
    pub preview: u64,

    /// Step index of the last delivered frame
    pub last_step: Option<u64>,

    /// Median production-to-delivery latency (ms)
    pub latency_p50_ms: f64,

    /// 95th percentile production-to-delivery latency (ms)
    pub latency_p95_ms: f64,
}

/// Capture artifact written during a run
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Artifact directory
    pub path: PathBuf,

    /// Frames recorded
    pub frames: u64,

    /// Frames the session dropped while the recorder was attached
    pub dropped_while_recording: u64,
}

impl RunStats {
    /// Achieved production rate in steps per second
    pub fn step_rate_hz(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_produced as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Drop rate as a percentage of everything enqueued
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_produced + self.frames_dropped;
        if total > 0 {
            (self.frames_dropped as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Session Run Summary                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Production");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames produced: {}", self.frames_produced);
        println!(
            "   ├─ Frames dropped: {} ({:.2}%)",
            self.frames_dropped,
            self.drop_rate()
        );
        println!("   ├─ Step rate: {:.2} Hz", self.step_rate_hz());
        println!(
            "   ├─ Final step: {} (t = {:.4}s)",
            self.final_step, self.sim_time_s
        );
        println!(
            "   └─ Solver step: mean {:.3} ms (min {:.3}, max {:.3})",
            self.solver_dt.mean_ms, self.solver_dt.min_ms, self.solver_dt.max_ms
        );

        if !self.subscribers.is_empty() {
            println!("\n📤 Subscribers ({})", self.subscribers.len());
            for (i, sub) in self.subscribers.iter().enumerate() {
                let prefix = if i == self.subscribers.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                let preview = if sub.preview > 0 {
                    format!(", {} preview", sub.preview)
                } else {
                    String::new()
                };
                println!(
                    "   {} {}: {} delivered, {} dropped{}, p50 {:.2} ms, p95 {:.2} ms",
                    prefix,
                    sub.label,
                    sub.delivered,
                    sub.dropped,
                    preview,
                    sub.latency_p50_ms,
                    sub.latency_p95_ms
                );
            }
        }

        if let Some(ref capture) = self.capture {
            println!("\n💾 Capture");
            println!("   ├─ Artifact: {}", capture.path.display());
            println!("   ├─ Frames recorded: {}", capture.frames);
            println!(
                "   └─ Dropped while recording: {}",
                capture.dropped_while_recording
            );
        }

        if let Some(ref fault) = self.fault {
            println!("\n⚠  Solver fault");
            println!("   ├─ Step: {}", fault.step_index);
            println!("   └─ {}", fault.message);
        }

        println!();
    }
}
