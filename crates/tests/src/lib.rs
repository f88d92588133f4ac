//! End-to-end suites for the frame streaming control plane.
//!
//! Everything here drives the public surface only: blueprints through
//! `config_loader`, sessions and stream handles through `session`,
//! artifacts through `capture`. Assertions about internals belong to the
//! owning crates; these suites hold the cross-crate promises instead:
//! bounded queues under any consumer behavior, per-subscriber isolation,
//! scrub freshness, and bit-exact replay of recorded runs.

#[cfg(test)]
mod support;

#[cfg(test)]
mod pipeline;

#[cfg(test)]
mod backpressure;

#[cfg(test)]
mod scrubbing;

#[cfg(test)]
mod replay_fidelity;
