//! In-process simulation drivers for testing without physical hardware.
//!
//! [`SimRegistry`] builds an [`ActuationRegistry`] pre-populated with stub
//! drivers that record commands. This lets the full node stack run in
//! headless tests and on a desktop without a wearable attached.
//!
//! # Example
//!
//! ```rust
//! use drishti_hal::registry::ActuationCommand;
//! use drishti_hal::sim::SimRegistry;
//! use drishti_types::ActuatorSet;
//!
//! let mut registry = SimRegistry::new()
//!     .with_motor_array(5)
//!     .with_buzzer()
//!     .build();
//!
//! registry
//!     .apply(ActuationCommand::Haptics(ActuatorSet::first(2)))
//!     .expect("sim haptics must succeed");
//! assert_eq!(registry.active_motors().ids(), vec![1, 2]);
//! ```

use std::sync::{Arc, Mutex};

use drishti_types::{ActuatorId, NodeError};

use crate::buzzer::{Buzzer, BuzzerPattern};
use crate::motor::HapticMotor;
use crate::registry::ActuationRegistry;

// ────────────────────────────────────────────────────────────────────────────
// Stub motor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated vibration motor that records its state. Always succeeds.
pub struct SimMotor {
    id: ActuatorId,
    active: bool,
}

impl SimMotor {
    pub fn new(id: ActuatorId) -> Box<Self> {
        Box::new(Self { id, active: false })
    }
}

impl HapticMotor for SimMotor {
    fn id(&self) -> ActuatorId {
        self.id
    }

    fn set_active(&mut self, active: bool) -> Result<(), NodeError> {
        self.active = active;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub buzzer
// ────────────────────────────────────────────────────────────────────────────

/// Patterns a [`SimBuzzer`] has been asked to play, oldest first.
pub type AlertLog = Arc<Mutex<Vec<BuzzerPattern>>>;

/// A simulated buzzer. A started pattern is held until [`Buzzer::stop`];
/// every accepted `play` is appended to an optional shared [`AlertLog`].
#[derive(Default)]
pub struct SimBuzzer {
    playing: Option<BuzzerPattern>,
    log: Option<AlertLog>,
}

impl SimBuzzer {
    pub fn new() -> Box<Self> {
        Box::default()
    }

    /// A buzzer that appends to `log`, so a test can observe it after the
    /// driver has been moved into a registry.
    pub fn logging_to(log: AlertLog) -> Box<Self> {
        Box::new(Self {
            playing: None,
            log: Some(log),
        })
    }
}

impl Buzzer for SimBuzzer {
    fn play(&mut self, pattern: BuzzerPattern) -> Result<(), NodeError> {
        if let Some(log) = &self.log {
            let mut log = log.lock().map_err(|_| NodeError::Hardware {
                component: "buzzer".to_string(),
                details: "alert log poisoned".to_string(),
            })?;
            log.push(pattern);
        }
        self.playing = Some(pattern);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        self.playing = None;
        Ok(())
    }

    fn playing(&self) -> Option<BuzzerPattern> {
        self.playing
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder that constructs an [`ActuationRegistry`] pre-populated with
/// simulated stub drivers.
///
/// Call the `with_*` methods to add the simulated components you need, then
/// call [`build`][Self::build] to obtain the configured registry.
#[derive(Default)]
pub struct SimRegistry {
    motors: Vec<Box<dyn HapticMotor>>,
    buzzer: Option<Box<dyn Buzzer>>,
}

impl SimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register simulated motors `1..=count` (capped at [`ActuatorId::MAX`]).
    pub fn with_motor_array(mut self, count: u8) -> Self {
        for id in (1..=count).filter_map(ActuatorId::new) {
            self.motors.push(SimMotor::new(id));
        }
        self
    }

    /// Install a silent [`SimBuzzer`].
    pub fn with_buzzer(mut self) -> Self {
        self.buzzer = Some(SimBuzzer::new());
        self
    }

    /// Install a [`SimBuzzer`] that records into `log`.
    pub fn with_logged_buzzer(mut self, log: AlertLog) -> Self {
        self.buzzer = Some(SimBuzzer::logging_to(log));
        self
    }

    /// Register a custom motor driver, e.g. one that injects faults.
    pub fn with_motor(mut self, motor: Box<dyn HapticMotor>) -> Self {
        self.motors.push(motor);
        self
    }

    /// Consume the builder and return the configured [`ActuationRegistry`].
    pub fn build(self) -> ActuationRegistry {
        let mut registry = ActuationRegistry::new();
        for m in self.motors {
            registry.register_motor(m);
        }
        if let Some(b) = self.buzzer {
            registry.set_buzzer(b);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActuationCommand;
    use drishti_types::ActuatorSet;

    #[test]
    fn motor_array_registers_consecutive_ids() {
        let registry = SimRegistry::new().with_motor_array(5).build();
        assert_eq!(registry.registered_motors().ids(), vec![1, 2, 3, 4, 5]);
        assert!(!registry.has_buzzer());
    }

    #[test]
    fn motor_array_is_capped() {
        let registry = SimRegistry::new().with_motor_array(20).build();
        assert_eq!(
            registry.registered_motors().len(),
            usize::from(ActuatorId::MAX)
        );
    }

    #[test]
    fn logged_buzzer_records_accepted_alerts() {
        let log = AlertLog::default();
        let mut registry = SimRegistry::new()
            .with_motor_array(5)
            .with_logged_buzzer(log.clone())
            .build();

        registry.apply(ActuationCommand::Alert(BuzzerPattern::Emergency)).unwrap();
        // Suppressed: lower priority than the emergency in progress.
        registry.apply(ActuationCommand::Alert(BuzzerPattern::Double)).unwrap();
        registry.apply(ActuationCommand::AllOff).unwrap();
        registry.apply(ActuationCommand::Alert(BuzzerPattern::Double)).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![BuzzerPattern::Emergency, BuzzerPattern::Double]
        );
    }

    #[test]
    fn full_array_round_trip() {
        let mut registry = SimRegistry::new().with_motor_array(5).with_buzzer().build();
        registry
            .apply(ActuationCommand::Haptics(ActuatorSet::first(5)))
            .unwrap();
        assert_eq!(registry.active_motors().len(), 5);
        registry.apply(ActuationCommand::AllOff).unwrap();
        assert!(registry.active_motors().is_empty());
    }
}
