//! Audible alerts.
//!
//! A [`Buzzer`] driver plays one [`BuzzerPattern`] at a time. Patterns are
//! described as on/off steps so a driver can play them from a timer without
//! blocking the sampling loop. Drivers latch the pattern; the caller stops it
//! once [`BuzzerPattern::duration`] has passed.

use std::time::Duration;

use drishti_types::NodeError;

/// Length of one standard beep.
pub const BEEP_DURATION: Duration = Duration::from_millis(300);
/// Gap between beeps in a pattern.
pub const BEEP_GAP: Duration = Duration::from_millis(100);
pub const EMERGENCY_BEEP_COUNT: usize = 5;
pub const NORMAL_BEEP_COUNT: usize = 2;

/// One on/off step of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepStep {
    pub on: Duration,
    pub off: Duration,
}

/// The alerts a node can sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuzzerPattern {
    /// Two plain beeps: the link to the node is back.
    Double,
    /// Short triple chirp for degraded link/sensor status.
    Warning,
    LowBattery,
    /// Fall alert. Outranks every other pattern.
    Emergency,
}

impl BuzzerPattern {
    /// On/off steps making up the pattern.
    pub fn schedule(&self) -> Vec<BeepStep> {
        let beep = |on: Duration, count: usize| {
            vec![BeepStep { on, off: BEEP_GAP }; count]
        };
        match self {
            BuzzerPattern::Double => beep(BEEP_DURATION, NORMAL_BEEP_COUNT),
            BuzzerPattern::Warning => beep(Duration::from_millis(100), 3),
            BuzzerPattern::LowBattery => beep(BEEP_DURATION * 2, NORMAL_BEEP_COUNT),
            BuzzerPattern::Emergency => beep(BEEP_DURATION, EMERGENCY_BEEP_COUNT),
        }
    }

    /// Total playing time.
    pub fn duration(&self) -> Duration {
        self.schedule().iter().map(|s| s.on + s.off).sum()
    }

    /// Higher values interrupt lower ones.
    pub fn priority(&self) -> u8 {
        match self {
            BuzzerPattern::Double => 0,
            BuzzerPattern::LowBattery => 1,
            BuzzerPattern::Warning => 2,
            BuzzerPattern::Emergency => 3,
        }
    }
}

/// An audible alert device.
pub trait Buzzer: Send + Sync {
    /// Start playing `pattern`, replacing whatever is playing.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Hardware`] if the driver cannot start playback.
    fn play(&mut self, pattern: BuzzerPattern) -> Result<(), NodeError>;

    /// Silence the buzzer.
    fn stop(&mut self) -> Result<(), NodeError>;

    /// The pattern currently playing, if any.
    fn playing(&self) -> Option<BuzzerPattern>;
}
