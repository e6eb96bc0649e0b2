//! [`NodeHealth`] – per-node health counters.
//!
//! The orchestrator records a fresh sample every tick and a delivery outcome
//! whenever the link layer finishes a send. Nothing else mutates these
//! counters; the [`FailSafePolicy`][crate::failsafe::FailSafePolicy] only
//! reads them.
//!
//! Time is passed in explicitly as a [`Timestamp`] so the same counters work
//! on a real clock, a paused Tokio clock, or in plain unit tests.

use std::time::Duration;

use drishti_types::Timestamp;
use tracing::debug;

/// Health state of one node.
///
/// # Example
///
/// ```
/// use drishti_kernel::health::NodeHealth;
/// use drishti_types::Timestamp;
///
/// let mut health = NodeHealth::new(Timestamp::ZERO);
/// health.record_link_exhausted();
/// health.record_link_exhausted();
/// assert_eq!(health.consecutive_link_failures(), 2);
///
/// health.record_delivery_success();
/// assert_eq!(health.consecutive_link_failures(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHealth {
    started_at: Timestamp,
    last_sample_at: Option<Timestamp>,
    consecutive_link_failures: u32,
    deliveries: u64,
    exhausted_sends: u64,
    invalid_readings: u64,
    link_reinitializations: u64,
}

impl NodeHealth {
    /// Fresh counters. `started_at` stands in for the last sample time until
    /// the first real sample arrives, so a sensor that never answers still
    /// times out.
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            started_at,
            last_sample_at: None,
            consecutive_link_failures: 0,
            deliveries: 0,
            exhausted_sends: 0,
            invalid_readings: 0,
            link_reinitializations: 0,
        }
    }

    /// A sample was read from the sensor.
    pub fn record_sample(&mut self, at: Timestamp) {
        self.last_sample_at = Some(at);
    }

    /// The sample's distance failed validation and was dropped.
    pub fn record_invalid_reading(&mut self) {
        self.invalid_readings += 1;
    }

    /// A send finished `Delivered`. Clears the failure streak.
    pub fn record_delivery_success(&mut self) {
        if self.consecutive_link_failures > 0 {
            debug!(
                after = self.consecutive_link_failures,
                "link recovered"
            );
        }
        self.consecutive_link_failures = 0;
        self.deliveries += 1;
    }

    /// A send finished `Exhausted`. Returns the new failure streak.
    pub fn record_link_exhausted(&mut self) -> u32 {
        self.consecutive_link_failures = self.consecutive_link_failures.saturating_add(1);
        self.exhausted_sends += 1;
        self.consecutive_link_failures
    }

    /// The link was re-initialised as a recovery step.
    pub fn record_link_reinitialization(&mut self) {
        self.link_reinitializations += 1;
    }

    /// Time since the last sample (or since start, before any sample).
    pub fn sensor_silence(&self, now: Timestamp) -> Duration {
        now.since(self.last_sample_at.unwrap_or(self.started_at))
    }

    pub fn last_sample_at(&self) -> Option<Timestamp> {
        self.last_sample_at
    }

    pub fn consecutive_link_failures(&self) -> u32 {
        self.consecutive_link_failures
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    pub fn exhausted_sends(&self) -> u64 {
        self.exhausted_sends
    }

    pub fn invalid_readings(&self) -> u64 {
        self.invalid_readings
    }

    pub fn link_reinitializations(&self) -> u64 {
        self.link_reinitializations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_has_no_failures() {
        let health = NodeHealth::new(Timestamp::from_millis(500));
        assert_eq!(health.consecutive_link_failures(), 0);
        assert_eq!(health.last_sample_at(), None);
        assert_eq!(
            health.sensor_silence(Timestamp::from_millis(1500)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn sample_resets_silence() {
        let mut health = NodeHealth::new(Timestamp::ZERO);
        health.record_sample(Timestamp::from_millis(10_000));
        assert_eq!(
            health.sensor_silence(Timestamp::from_millis(10_200)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn failure_streak_counts_and_resets() {
        let mut health = NodeHealth::new(Timestamp::ZERO);
        assert_eq!(health.record_link_exhausted(), 1);
        assert_eq!(health.record_link_exhausted(), 2);
        assert_eq!(health.record_link_exhausted(), 3);
        health.record_delivery_success();
        assert_eq!(health.consecutive_link_failures(), 0);
        assert_eq!(health.exhausted_sends(), 3);
        assert_eq!(health.deliveries(), 1);
        // Totals survive the reset.
        assert_eq!(health.record_link_exhausted(), 1);
        assert_eq!(health.exhausted_sends(), 4);
    }

    #[test]
    fn clock_going_backwards_is_zero_silence() {
        let mut health = NodeHealth::new(Timestamp::ZERO);
        health.record_sample(Timestamp::from_millis(5_000));
        assert_eq!(
            health.sensor_silence(Timestamp::from_millis(4_000)),
            Duration::ZERO
        );
    }

    #[test]
    fn invalid_readings_accumulate() {
        let mut health = NodeHealth::new(Timestamp::ZERO);
        health.record_invalid_reading();
        health.record_invalid_reading();
        assert_eq!(health.invalid_readings(), 2);
    }
}
