//! # Frame Codec
//!
//! Binary frame schema: canonical encoding, zero-copy decoding, and
//! content hashing.
//!
//! Responsibilities:
//! - Serialize a `Frame` to one contiguous aligned buffer
//! - Decode with `Bytes` views into the input (nodal arrays never copied)
//! - Seal and verify `state_hash` (BLAKE3 over the hash-zeroed encoding)
//!
//! The encode order is fixed (metadata, topology, nodal arrays, contact,
//! probes, aggregates) so `decode(encode(f)) == f` holds including the
//! hash, and re-encoding a decoded frame reproduces identical bytes.

mod decode;
mod encode;
pub mod layout;

pub use decode::decode;
pub use encode::{compute_state_hash, encode, seal, verify_sealed};
pub use layout::{aligned_copy, SCHEMA_VERSION};
