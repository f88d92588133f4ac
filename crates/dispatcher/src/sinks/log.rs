//! LogSink - logs a one-line frame summary via tracing

use contracts::{Frame, FrameSink, StreamError};
use tracing::{info, instrument};

/// Sink that logs frame summaries, for debugging a pipeline end to end
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl FrameSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_deliver",
        skip(self, frame),
        fields(sink = %self.name, step_index = frame.meta.step_index)
    )]
    async fn deliver(&mut self, frame: &Frame) -> Result<(), StreamError> {
        info!(
            sink = %self.name,
            step_index = frame.meta.step_index,
            time_s = frame.meta.time_s,
            nodes = frame.nodal.node_count,
            preview = frame.is_preview(),
            "frame delivered"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), StreamError> {
        // Nothing buffered
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), StreamError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use contracts::{u32s_to_bytes, FrameFlags, FrameMeta, NodalArrays, TopologySnapshot};

    fn test_frame() -> Frame {
        Frame {
            meta: FrameMeta::unsealed(1.0, 1, FrameFlags::empty()),
            topology: Arc::new(TopologySnapshot {
                topo_version: 1,
                parts: Vec::new(),
                index_buffer: u32s_to_bytes(Vec::new()),
            }),
            nodal: NodalArrays::from_displacements(Vec::new(), Vec::new(), Vec::new()).unwrap(),
            contact: None,
            probes: None,
            aggregates: None,
        }
    }

    #[tokio::test]
    async fn test_log_sink_deliver() {
        let mut sink = LogSink::new("test_log");
        assert!(sink.deliver(&test_frame()).await.is_ok());
        assert!(sink.flush().await.is_ok());
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
