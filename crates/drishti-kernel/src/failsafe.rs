//! [`FailSafePolicy`] – escalation rules for sustained failures.
//!
//! Recoverable conditions are handled where they happen (retry, drop and
//! count). Only two conditions escalate to an externally visible degraded
//! status:
//!
//! - **Sensor degraded**: no fresh sample within
//!   [`FailSafePolicy::sensor_timeout`]. Haptics stay off until a sample
//!   arrives again.
//! - **Link degraded**: at least [`FailSafePolicy::link_failure_limit`]
//!   consecutive exhausted sends. Below the limit every exhausted send
//!   triggers a link re-initialisation instead.
//!
//! Low battery is reported alongside but is not a fault.

use std::time::Duration;

use drishti_types::{NodeError, Timestamp, flags};

use crate::health::NodeHealth;

pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LINK_FAILURE_LIMIT: u32 = 5;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// What the orchestrator should do after an exhausted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Re-initialise the transport and keep sending.
    Reinitialize,
    /// Stop recovery attempts; surface the link as degraded.
    Degraded,
}

/// Degraded-mode flags exposed to the actuation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailSafeStatus {
    pub link_degraded: bool,
    pub sensor_degraded: bool,
    pub low_battery: bool,
}

impl FailSafeStatus {
    /// `true` when a collaborator should switch to local-only safety mode.
    pub fn is_degraded(&self) -> bool {
        self.link_degraded || self.sensor_degraded
    }

    /// The matching [`flags`] bits for an outgoing packet.
    pub fn packet_flags(&self) -> u8 {
        let mut bits = 0;
        if self.link_degraded {
            bits |= flags::LINK_DEGRADED;
        }
        if self.sensor_degraded {
            bits |= flags::SENSOR_DEGRADED;
        }
        if self.low_battery {
            bits |= flags::LOW_BATTERY;
        }
        bits
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FailSafePolicy
// ────────────────────────────────────────────────────────────────────────────

/// Thresholds that turn [`NodeHealth`] counters into a [`FailSafeStatus`].
///
/// # Example
///
/// ```
/// use drishti_kernel::failsafe::{FailSafePolicy, LinkAction};
/// use drishti_kernel::health::NodeHealth;
/// use drishti_types::Timestamp;
///
/// let policy = FailSafePolicy::default();
/// let mut health = NodeHealth::new(Timestamp::ZERO);
///
/// for _ in 0..4 {
///     health.record_link_exhausted();
///     assert_eq!(policy.link_action(&health), LinkAction::Reinitialize);
/// }
/// health.record_link_exhausted();
/// assert_eq!(policy.link_action(&health), LinkAction::Degraded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailSafePolicy {
    pub sensor_timeout: Duration,
    pub link_failure_limit: u32,
}

impl Default for FailSafePolicy {
    fn default() -> Self {
        Self {
            sensor_timeout: DEFAULT_SENSOR_TIMEOUT,
            link_failure_limit: DEFAULT_LINK_FAILURE_LIMIT,
        }
    }
}

impl FailSafePolicy {
    /// Recovery step for the current failure streak.
    pub fn link_action(&self, health: &NodeHealth) -> LinkAction {
        if health.consecutive_link_failures() >= self.link_failure_limit {
            LinkAction::Degraded
        } else {
            LinkAction::Reinitialize
        }
    }

    /// Silence longer than the timeout is degraded; exactly the timeout is not.
    pub fn sensor_degraded(&self, health: &NodeHealth, now: Timestamp) -> bool {
        health.sensor_silence(now) > self.sensor_timeout
    }

    pub fn link_degraded(&self, health: &NodeHealth) -> bool {
        self.link_action(health) == LinkAction::Degraded
    }

    /// Evaluate every rule against the current counters.
    pub fn evaluate(&self, health: &NodeHealth, now: Timestamp, low_battery: bool) -> FailSafeStatus {
        FailSafeStatus {
            link_degraded: self.link_degraded(health),
            sensor_degraded: self.sensor_degraded(health, now),
            low_battery,
        }
    }

    /// The sustained failures as errors, for reporting. Empty when healthy.
    /// Pure; callers log at the transition they care about.
    pub fn faults(&self, health: &NodeHealth, now: Timestamp) -> Vec<NodeError> {
        let mut faults = Vec::new();
        if self.sensor_degraded(health, now) {
            let silent_ms =
                u64::try_from(health.sensor_silence(now).as_millis()).unwrap_or(u64::MAX);
            faults.push(NodeError::SensorTimeout { silent_ms });
        }
        if self.link_degraded(health) {
            faults.push(NodeError::CommunicationFailure {
                consecutive: health.consecutive_link_failures(),
            });
        }
        faults
    }
}
