//! Command implementations.

mod info;
mod replay;
mod run;
mod validate;

pub use info::run_info;
pub use replay::run_replay;
pub use run::run_stream;
pub use validate::run_validate;
