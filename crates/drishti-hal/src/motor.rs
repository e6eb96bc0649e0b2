//! `HapticMotor` trait for the wearer's vibration motors.

use drishti_types::{ActuatorId, NodeError};

/// One on/off vibration motor.
///
/// Drivers implement this trait and register themselves with an
/// [`ActuationRegistry`][crate::registry::ActuationRegistry].
pub trait HapticMotor: Send + Sync {
    /// Position of this motor in the array, numbered from 1.
    fn id(&self) -> ActuatorId;

    /// Drive the motor (`true` = vibrating).
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Hardware`] if the command cannot be applied.
    fn set_active(&mut self, active: bool) -> Result<(), NodeError>;

    /// Return the motor's current state.
    fn is_active(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockMotor {
        id: ActuatorId,
        active: bool,
    }

    impl HapticMotor for MockMotor {
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

    #[test]
    fn mock_motor_toggle() {
        let id = ActuatorId::new(2).unwrap();
        let mut motor = MockMotor { id, active: false };
        assert_eq!(motor.id(), id);
        assert!(!motor.is_active());

        motor.set_active(true).unwrap();
        assert!(motor.is_active());

        motor.set_active(false).unwrap();
        assert!(!motor.is_active());
    }
}
