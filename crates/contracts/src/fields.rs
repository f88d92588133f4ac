//! Subscription contracts: fields mask, drop policy, subscription spec
//!
//! A subscription declares up front which optional frame content it wants;
//! the dispatcher projects everything else out before enqueueing.

use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Requested optional nodal/aggregate content, as a bitset.
///
/// Displacements and topology are always delivered; the mask only governs
/// the optional sections. Unknown bits are a configuration error at
/// subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldsMask(u32);

impl FieldsMask {
    /// Per-node rotations.
    pub const ROTATIONS: FieldsMask = FieldsMask(1 << 0);

    /// Per-node equivalent strain.
    pub const STRAINS: FieldsMask = FieldsMask(1 << 1);

    /// Per-node von Mises stress.
    pub const STRESSES: FieldsMask = FieldsMask(1 << 2);

    /// Per-part aggregates (min/max stress, RMS displacement).
    pub const AGGREGATES: FieldsMask = FieldsMask(1 << 3);

    const ALL_BITS: u32 = 0b1111;

    /// No optional fields.
    pub const fn none() -> Self {
        FieldsMask(0)
    }

    /// Every optional field.
    pub const fn all() -> Self {
        FieldsMask(Self::ALL_BITS)
    }

    /// Raw bit representation.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits, rejecting unknown bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL_BITS != 0 {
            return None;
        }
        Some(FieldsMask(bits))
    }

    /// True if every bit of `other` is set.
    pub const fn contains(&self, other: FieldsMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FieldsMask {
    type Output = FieldsMask;

    fn bitor(self, rhs: FieldsMask) -> FieldsMask {
        FieldsMask(self.0 | rhs.0)
    }
}

/// Queue behavior when a subscription's queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued frame, enqueue the new one (freshness wins)
    #[default]
    DropOldest,
    /// Reject the incoming frame (queued backlog wins)
    DropNewest,
}

fn default_queue_depth() -> usize {
    8
}

/// A consumer's registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Subscriber name (used for logging/diagnostics)
    pub label: String,

    /// Requested optional nodal/aggregate fields
    #[serde(default)]
    pub fields: FieldsMask,

    /// Deliver contact geometry sections
    #[serde(default)]
    pub include_contact: bool,

    /// Deliver probe sample sections
    #[serde(default)]
    pub include_probes: bool,

    /// Private queue depth for this subscriber
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Behavior when the private queue is full
    #[serde(default)]
    pub drop_policy: DropPolicy,
}

impl SubscriptionSpec {
    /// Spec with defaults for the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: FieldsMask::none(),
            include_contact: false,
            include_probes: false,
            queue_depth: default_queue_depth(),
            drop_policy: DropPolicy::default(),
        }
    }

    /// Request optional fields.
    pub fn with_fields(mut self, fields: FieldsMask) -> Self {
        self.fields = fields;
        self
    }

    /// Request contact geometry.
    pub fn with_contact(mut self) -> Self {
        self.include_contact = true;
        self
    }

    /// Request probe samples.
    pub fn with_probes(mut self) -> Self {
        self.include_probes = true;
        self
    }

    /// Override the private queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Override the drop policy.
    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Reject invalid registration requests before any queue is built.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.label.is_empty() {
            return Err(StreamError::configuration(
                "subscription.label",
                "subscriber label cannot be empty",
            ));
        }
        if self.queue_depth == 0 {
            return Err(StreamError::configuration(
                format!("subscription[{}].queue_depth", self.label),
                "queue depth must be at least 1, got 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits_roundtrip() {
        let mask = FieldsMask::STRESSES | FieldsMask::AGGREGATES;
        assert!(mask.contains(FieldsMask::STRESSES));
        assert!(!mask.contains(FieldsMask::ROTATIONS));
        assert_eq!(FieldsMask::from_bits(mask.bits()), Some(mask));
    }

    #[test]
    fn unknown_mask_bits_rejected() {
        assert_eq!(FieldsMask::from_bits(1 << 16), None);
        assert_eq!(FieldsMask::from_bits(FieldsMask::all().bits()), Some(FieldsMask::all()));
    }

    #[test]
    fn zero_depth_rejected() {
        let spec = SubscriptionSpec::new("renderer").with_queue_depth(0);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("queue depth"), "got: {err}");
    }

    #[test]
    fn empty_label_rejected() {
        let spec = SubscriptionSpec::new("");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn builder_sets_requests() {
        let spec = SubscriptionSpec::new("probe_panel")
            .with_probes()
            .with_fields(FieldsMask::AGGREGATES)
            .with_drop_policy(DropPolicy::DropNewest);
        assert!(spec.include_probes);
        assert!(!spec.include_contact);
        assert!(spec.fields.contains(FieldsMask::AGGREGATES));
        assert_eq!(spec.drop_policy, DropPolicy::DropNewest);
        assert!(spec.validate().is_ok());
    }
}
