//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Simulation time (seconds, f64) is the primary clock
//! - `step_index` is strictly increasing within one session run and orders
//!   delivery within a subscription

mod channel_id;
mod diagnostics;
mod error;
mod fields;
mod frame;
mod params;
mod session;
mod sink;
mod stepper;

pub use channel_id::ChannelId;
pub use diagnostics::*;
pub use error::*;
pub use fields::*;
pub use frame::*;
pub use params::*;
pub use session::*;
pub use sink::*;
pub use stepper::*;
