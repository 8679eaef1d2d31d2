//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the client engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Window during which resource requests are coalesced (ms).
    pub request_delay_ms: u64,
    /// How long a local change may stay unconfirmed before it is rolled
    /// back (ms).
    pub confirmation_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 100,
            confirmation_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}
