//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and limits for a device session
///
/// All durations are in milliseconds so the struct reads naturally from a
/// settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait for an ACK/NAK after each acknowledged send
    pub ack_timeout_ms: u64,
    /// Attempts per acknowledged send, including the first
    pub max_send_attempts: u32,
    /// Silence during a pending read before the watchdog sends a NAK
    pub watchdog_quiet_ms: u64,
    /// Wait for product data when opening
    pub product_timeout_ms: u64,
    /// Wait for the protocol array after product data
    pub capability_timeout_ms: u64,
    /// Packets between progress events during bulk transfers
    pub progress_interval: u32,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Extra screenshot passes after corrupted image data
    pub screenshot_retries: u32,
    /// Silence after a corrupt frame before an unfinished screenshot is
    /// requested again or delivered
    pub screenshot_settle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2_000,
            max_send_attempts: 5,
            watchdog_quiet_ms: 5_000,
            product_timeout_ms: 3_000,
            capability_timeout_ms: 2_000,
            progress_interval: 10,
            event_capacity: 256,
            screenshot_retries: 1,
            screenshot_settle_ms: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn watchdog_quiet(&self) -> Duration {
        Duration::from_millis(self.watchdog_quiet_ms)
    }

    pub fn product_timeout(&self) -> Duration {
        Duration::from_millis(self.product_timeout_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn screenshot_settle(&self) -> Duration {
        Duration::from_millis(self.screenshot_settle_ms)
    }
}
