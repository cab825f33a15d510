//! Wire and decode limits.

use serde::{Deserialize, Serialize};

/// Values are explicit about their units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_frame_bytes: usize,
    pub max_payload_bytes: usize,
    pub max_metadata_entries: usize,

    pub max_cbor_depth: usize,
    pub max_cbor_map_entries: usize,
    pub max_cbor_array_entries: usize,
    pub max_cbor_bytes_string_len: usize,
    pub max_cbor_text_string_len: usize,

    /// Records replayed per SUBSCRIBE before live delivery.
    pub max_subscription_replay: usize,
    pub max_subscriptions_per_log: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            max_payload_bytes: 8 * 1024 * 1024,
            max_metadata_entries: 64,

            max_cbor_depth: 8,
            max_cbor_map_entries: 64,
            max_cbor_array_entries: 1024,
            max_cbor_bytes_string_len: 8 * 1024 * 1024,
            max_cbor_text_string_len: 4096,

            max_subscription_replay: 100_000,
            max_subscriptions_per_log: 1024,
        }
    }
}

/// Partial override, applied over defaults by the config layers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsOverride {
    pub max_frame_bytes: Option<usize>,
    pub max_payload_bytes: Option<usize>,
    pub max_subscription_replay: Option<usize>,
    pub max_subscriptions_per_log: Option<usize>,
}

impl LimitsOverride {
    pub fn apply_to(&self, target: &mut Limits) {
        if let Some(value) = self.max_frame_bytes {
            target.max_frame_bytes = value;
        }
        if let Some(value) = self.max_payload_bytes {
            target.max_payload_bytes = value;
        }
        if let Some(value) = self.max_subscription_replay {
            target.max_subscription_replay = value;
        }
        if let Some(value) = self.max_subscriptions_per_log {
            target.max_subscriptions_per_log = value;
        }
    }
}
