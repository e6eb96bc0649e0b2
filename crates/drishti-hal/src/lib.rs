//! `drishti-hal` – actuation layer.
//!
//! Everything between "the node decided to alert" and current flowing
//! through a vibration motor or buzzer.
//!
//! # Modules
//!
//! - [`haptic`] – [`HapticMapper`][haptic::HapticMapper]: pure mapping from
//!   obstacle distance to the set of motors to energise.
//! - [`motor`] – [`HapticMotor`][motor::HapticMotor] driver trait.
//! - [`buzzer`] – [`Buzzer`][buzzer::Buzzer] driver trait and the
//!   [`BuzzerPattern`][buzzer::BuzzerPattern] catalogue.
//! - [`registry`] – [`ActuationRegistry`][registry::ActuationRegistry]:
//!   routes [`ActuationCommand`][registry::ActuationCommand]s to drivers.
//! - [`sim`] – in-process drivers for headless runs and tests.

pub mod buzzer;
pub mod haptic;
pub mod motor;
pub mod registry;
pub mod sim;

pub use buzzer::{Buzzer, BuzzerPattern};
pub use haptic::HapticMapper;
pub use motor::HapticMotor;
pub use registry::{ActuationCommand, ActuationRegistry};
pub use sim::{SimBuzzer, SimMotor, SimRegistry};
