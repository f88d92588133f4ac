//! Bundled frame sinks

mod log;

pub use log::LogSink;
