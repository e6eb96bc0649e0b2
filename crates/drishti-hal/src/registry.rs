//! [`ActuationRegistry`] – central driver registry and command dispatcher.
//!
//! The registry owns every registered [`HapticMotor`] and the optional
//! [`Buzzer`]. When the node issues an [`ActuationCommand`], the registry
//! resolves the target drivers by [`ActuatorId`] and calls the appropriate
//! method.
//!
//! # Haptic sets
//!
//! [`ActuationCommand::Haptics`] carries the complete set of motors that
//! should vibrate. Members are energised, every other registered motor is
//! de-energised, so the physical array always mirrors the last set applied.

use std::collections::BTreeMap;

use drishti_types::{ActuatorId, ActuatorSet, NodeError};
use tracing::{debug, warn};

use crate::buzzer::{Buzzer, BuzzerPattern};
use crate::motor::HapticMotor;

/// A command for the node's output devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationCommand {
    /// Vibrate exactly this set of motors.
    Haptics(ActuatorSet),
    /// Sound an alert. Ignored while a higher-priority pattern is playing.
    Alert(BuzzerPattern),
    /// Silence the buzzer, leaving the motors as they are.
    Silence,
    /// Stop every motor and silence the buzzer.
    AllOff,
}

/// Central output driver registry and [`ActuationCommand`] dispatcher.
///
/// Construct with [`ActuationRegistry::new`], register drivers, then call
/// [`ActuationRegistry::apply`] to translate commands into hardware calls.
#[derive(Default)]
pub struct ActuationRegistry {
    motors: BTreeMap<ActuatorId, Box<dyn HapticMotor>>,
    buzzer: Option<Box<dyn Buzzer>>,
}

impl ActuationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a motor driver. Any previously registered driver with the
    /// same id is replaced.
    pub fn register_motor(&mut self, motor: Box<dyn HapticMotor>) {
        self.motors.insert(motor.id(), motor);
    }

    /// Install the buzzer driver, replacing any previous one.
    pub fn set_buzzer(&mut self, buzzer: Box<dyn Buzzer>) {
        self.buzzer = Some(buzzer);
    }

    pub fn has_buzzer(&self) -> bool {
        self.buzzer.is_some()
    }

    /// Ids of every registered motor.
    pub fn registered_motors(&self) -> ActuatorSet {
        self.motors.keys().copied().collect()
    }

    /// Motors currently vibrating.
    pub fn active_motors(&self) -> ActuatorSet {
        self.motors
            .values()
            .filter(|m| m.is_active())
            .map(|m| m.id())
            .collect()
    }

    /// Pattern the buzzer is playing, if a buzzer is installed and busy.
    pub fn playing(&self) -> Option<BuzzerPattern> {
        self.buzzer.as_ref().and_then(|b| b.playing())
    }

    /// Apply an [`ActuationCommand`] to the registered drivers.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Hardware`] when a target motor or the buzzer is
    /// not registered, or when the underlying driver call fails. A haptic set
    /// naming an unregistered motor is rejected before any motor changes.
    pub fn apply(&mut self, command: ActuationCommand) -> Result<(), NodeError> {
        match command {
            ActuationCommand::Haptics(set) => {
                if let Some(missing) = set.iter().find(|id| !self.motors.contains_key(id)) {
                    return Err(NodeError::Hardware {
                        component: missing.to_string(),
                        details: format!("motor '{missing}' is not registered"),
                    });
                }
                for (id, motor) in self.motors.iter_mut() {
                    let want = set.contains(*id);
                    if motor.is_active() != want {
                        motor.set_active(want)?;
                    }
                }
                debug!(motors = ?set.ids(), "haptics applied");
                Ok(())
            }

            ActuationCommand::Alert(pattern) => {
                let Some(buzzer) = self.buzzer.as_mut() else {
                    return Err(NodeError::Hardware {
                        component: "buzzer".to_string(),
                        details: "no buzzer is registered".to_string(),
                    });
                };
                if let Some(current) = buzzer.playing() {
                    if current.priority() > pattern.priority() {
                        debug!(?current, ?pattern, "alert suppressed by higher priority pattern");
                        return Ok(());
                    }
                }
                debug!(?pattern, duration = ?pattern.duration(), "alert started");
                buzzer.play(pattern)
            }

            // Nothing to silence without a buzzer.
            ActuationCommand::Silence => match self.buzzer.as_mut() {
                Some(buzzer) => buzzer.stop(),
                None => Ok(()),
            },

            // Every device is attempted; the first failure is reported.
            ActuationCommand::AllOff => {
                let mut first_err = None;
                for motor in self.motors.values_mut() {
                    if let Err(e) = motor.set_active(false) {
                        warn!(motor = %motor.id(), error = %e, "failed to stop motor");
                        first_err.get_or_insert(e);
                    }
                }
                if let Some(buzzer) = self.buzzer.as_mut() {
                    if let Err(e) = buzzer.stop() {
                        warn!(error = %e, "failed to silence buzzer");
                        first_err.get_or_insert(e);
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }
}
