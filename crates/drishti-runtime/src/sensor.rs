//! Sensor acquisition.
//!
//! The orchestrator reads one [`SensorSample`] per tick through the
//! [`SensorSource`] trait and bounds every read with a timeout, so a stuck
//! driver costs one tick, never the loop.
//!
//! Two sources ship with the runtime:
//!
//! - [`ReplaySensor`] plays back a fixed script (tests, recorded sessions).
//! - [`SimulatedWalk`] generates a noisy approach toward an obstacle from a
//!   seeded RNG, optionally with one scripted fall.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use drishti_perception::signal_filter::{ECHO_TIMEOUT_US, SPEED_OF_SOUND_CM_PER_US, pulse_to_cm};
use drishti_types::{NodeError, SensorSample, Timestamp, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of per-tick sensor samples.
#[async_trait]
pub trait SensorSource: Send {
    /// Take one sample, stamped `captured_at`.
    ///
    /// # Errors
    ///
    /// [`NodeError::Hardware`] or [`NodeError::InvalidReading`] when the
    /// sensor cannot produce a sample this tick.
    async fn read(&mut self, captured_at: Timestamp) -> Result<SensorSample, NodeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// ReplaySensor
// ────────────────────────────────────────────────────────────────────────────

/// One scripted read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
    Reading {
        distance_cm: Option<f32>,
        /// Magnitude of a purely vertical acceleration (g).
        accel_g: f32,
        battery_volts: Option<f32>,
    },
    Fail(NodeError),
    /// Never answer; the caller's timeout fires.
    Hang,
}

impl ReplayStep {
    pub fn reading(distance_cm: f32, accel_g: f32) -> Self {
        ReplayStep::Reading {
            distance_cm: Some(distance_cm),
            accel_g,
            battery_volts: None,
        }
    }

    pub fn with_battery(self, volts: f32) -> Self {
        match self {
            ReplayStep::Reading {
                distance_cm,
                accel_g,
                ..
            } => ReplayStep::Reading {
                distance_cm,
                accel_g,
                battery_volts: Some(volts),
            },
            other => other,
        }
    }
}

/// Plays back [`ReplayStep`]s in order, then repeats `after_end` forever.
pub struct ReplaySensor {
    steps: VecDeque<ReplayStep>,
    after_end: ReplayStep,
    reads: u64,
}

impl ReplaySensor {
    /// After the script, the sensor hangs.
    pub fn new(steps: impl IntoIterator<Item = ReplayStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            after_end: ReplayStep::Hang,
            reads: 0,
        }
    }

    /// Repeat `step` once the script is exhausted.
    pub fn then_repeat(mut self, step: ReplayStep) -> Self {
        self.after_end = step;
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

#[async_trait]
impl SensorSource for ReplaySensor {
    async fn read(&mut self, captured_at: Timestamp) -> Result<SensorSample, NodeError> {
        self.reads += 1;
        let step = self.steps.pop_front().unwrap_or_else(|| self.after_end.clone());
        match step {
            ReplayStep::Reading {
                distance_cm,
                accel_g,
                battery_volts,
            } => {
                let mut sample =
                    SensorSample::new(distance_cm, Vec3::new(0.0, 0.0, accel_g), captured_at);
                sample.battery_volts = battery_volts;
                Ok(sample)
            }
            ReplayStep::Fail(e) => Err(e),
            ReplayStep::Hang => std::future::pending().await,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimulatedWalk
// ────────────────────────────────────────────────────────────────────────────

/// Magnitudes replayed after the scripted fall starts, one per 200 ms slot:
/// free fall, deeper free fall, impact.
const FALL_PROFILE_G: [f32; 3] = [0.2, 0.1, 3.5];
const FALL_SLOT: Duration = Duration::from_millis(200);

/// Parameters of a [`SimulatedWalk`].
#[derive(Debug, Clone, PartialEq)]
pub struct WalkProfile {
    /// Distance at which each approach starts.
    pub start_cm: f32,
    /// Closest point before the walker turns away and starts over.
    pub closest_cm: f32,
    pub speed_cm_per_s: f32,
    /// Uniform ranging noise amplitude.
    pub noise_cm: f32,
    /// Probability of a single-sample echo spike.
    pub spike_rate: f64,
    /// Probability that a ping gets no echo back.
    pub dropout_rate: f64,
    /// Cell voltage at start and its drain rate.
    pub start_volts: f32,
    pub drain_volts_per_s: f32,
    pub fall_at: Option<Timestamp>,
}

impl Default for WalkProfile {
    fn default() -> Self {
        Self {
            start_cm: 150.0,
            closest_cm: 10.0,
            speed_cm_per_s: 20.0,
            noise_cm: 1.5,
            spike_rate: 0.05,
            dropout_rate: 0.02,
            start_volts: 4.1,
            drain_volts_per_s: 0.0,
            fall_at: None,
        }
    }
}

/// Synthetic wearer walking toward an obstacle.
pub struct SimulatedWalk {
    profile: WalkProfile,
    rng: StdRng,
}

impl SimulatedWalk {
    pub fn new(profile: WalkProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Noise-free distance at `at`.
    pub fn true_distance(&self, at: Timestamp) -> f32 {
        let p = &self.profile;
        let span = (p.start_cm - p.closest_cm).max(1.0);
        let travelled = p.speed_cm_per_s.max(0.0) * at.as_millis() as f32 / 1000.0;
        p.start_cm - travelled % span
    }

    fn accel_magnitude(&mut self, at: Timestamp) -> f32 {
        if let Some(fall_at) = self.profile.fall_at {
            if at >= fall_at {
                let slot = (at.since(fall_at).as_millis() / FALL_SLOT.as_millis()) as usize;
                if let Some(g) = FALL_PROFILE_G.get(slot) {
                    return *g;
                }
            }
        }
        // Walking gait: roughly 1 g with a small bounce.
        1.0 + self.rng.gen_range(-0.15..=0.15)
    }

    /// Round-trip echo time for a ping at `at`, or `None` when it is lost.
    fn echo_us(&mut self, at: Timestamp) -> Option<f32> {
        let p = &self.profile;
        let (spike_rate, dropout_rate, noise_cm) = (p.spike_rate, p.dropout_rate, p.noise_cm);
        let mut distance = self.true_distance(at);
        if self.rng.gen_bool(dropout_rate.clamp(0.0, 1.0)) {
            return None;
        }
        if self.rng.gen_bool(spike_rate.clamp(0.0, 1.0)) {
            distance += self.rng.gen_range(80.0..200.0);
        } else if noise_cm > 0.0 {
            distance += self.rng.gen_range(-noise_cm..=noise_cm);
        }
        let echo = distance.max(0.0) * 2.0 / SPEED_OF_SOUND_CM_PER_US;
        (echo <= ECHO_TIMEOUT_US).then_some(echo)
    }
}

#[async_trait]
impl SensorSource for SimulatedWalk {
    async fn read(&mut self, captured_at: Timestamp) -> Result<SensorSample, NodeError> {
        let distance_cm = self.echo_us(captured_at).map(pulse_to_cm);
        let m = self.accel_magnitude(captured_at);
        let elapsed_s = captured_at.as_millis() as f32 / 1000.0;
        let volts = self.profile.start_volts - self.profile.drain_volts_per_s * elapsed_s;

        Ok(SensorSample {
            distance_cm,
            accel: Vec3::new(0.0, 0.0, m),
            gyro: Vec3::default(),
            battery_volts: Some(volts),
            temperature_c: Some(24.0 + self.rng.gen_range(-0.5..=0.5)),
            captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drishti_perception::FallDetector;

    #[tokio::test]
    async fn replay_plays_script_then_repeats() {
        let mut sensor = ReplaySensor::new([
            ReplayStep::reading(42.0, 1.0).with_battery(3.9),
            ReplayStep::Fail(NodeError::InvalidReading("echo lost".into())),
        ])
        .then_repeat(ReplayStep::reading(80.0, 1.0));

        let first = sensor.read(Timestamp::from_millis(0)).await.unwrap();
        assert_eq!(first.distance_cm, Some(42.0));
        assert_eq!(first.battery_volts, Some(3.9));
        assert!(sensor.read(Timestamp::from_millis(200)).await.is_err());
        for at in [400, 600] {
            let s = sensor.read(Timestamp::from_millis(at)).await.unwrap();
            assert_eq!(s.distance_cm, Some(80.0));
            assert_eq!(s.captured_at, Timestamp::from_millis(at));
        }
        assert_eq!(sensor.reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_replay_hangs() {
        let mut sensor = ReplaySensor::new(Vec::new());
        let read = tokio::time::timeout(Duration::from_millis(50), sensor.read(Timestamp::ZERO));
        assert!(read.await.is_err());
    }

    #[tokio::test]
    async fn walk_is_deterministic_per_seed() {
        let mut a = SimulatedWalk::new(WalkProfile::default(), 11);
        let mut b = SimulatedWalk::new(WalkProfile::default(), 11);
        for ms in (0..2_000).step_by(200) {
            let at = Timestamp::from_millis(ms);
            assert_eq!(a.read(at).await.unwrap(), b.read(at).await.unwrap());
        }
    }

    #[test]
    fn walk_approaches_then_restarts() {
        let walk = SimulatedWalk::new(WalkProfile::default(), 0);
        assert_eq!(walk.true_distance(Timestamp::ZERO), 150.0);
        assert!((walk.true_distance(Timestamp::from_millis(5_000)) - 50.0).abs() < 1e-3);
        // 140 cm span at 20 cm/s: back at the start after 7 s.
        assert!((walk.true_distance(Timestamp::from_millis(7_000)) - 150.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn ranges_come_from_echo_times() {
        let profile = WalkProfile {
            noise_cm: 0.0,
            spike_rate: 0.0,
            dropout_rate: 0.0,
            ..WalkProfile::default()
        };
        let mut walk = SimulatedWalk::new(profile, 3);
        let at = Timestamp::from_millis(5_000);
        let sample = walk.read(at).await.unwrap();
        let cm = sample.distance_cm.unwrap();
        assert!((cm - walk.true_distance(at)).abs() < 1e-2, "{cm}");
    }

    #[tokio::test]
    async fn lost_pings_have_no_distance() {
        let always_lost = WalkProfile {
            dropout_rate: 1.0,
            ..WalkProfile::default()
        };
        let mut walk = SimulatedWalk::new(always_lost, 3);
        assert_eq!(walk.read(Timestamp::ZERO).await.unwrap().distance_cm, None);

        // Beyond the echo timeout (~510 cm) nothing comes back either.
        let far = WalkProfile {
            start_cm: 600.0,
            speed_cm_per_s: 0.0,
            noise_cm: 0.0,
            spike_rate: 0.0,
            dropout_rate: 0.0,
            ..WalkProfile::default()
        };
        let mut walk = SimulatedWalk::new(far, 3);
        assert_eq!(walk.read(Timestamp::ZERO).await.unwrap().distance_cm, None);
    }

    #[tokio::test]
    async fn scripted_fall_is_detected_once() {
        let profile = WalkProfile {
            fall_at: Some(Timestamp::from_millis(2_000)),
            ..WalkProfile::default()
        };
        let mut walk = SimulatedWalk::new(profile, 5);
        let mut detector = FallDetector::default();
        let mut events = 0;
        for ms in (0..6_000).step_by(200) {
            let sample = walk.read(Timestamp::from_millis(ms)).await.unwrap();
            if detector.update(sample.accel, sample.captured_at).is_some() {
                events += 1;
            }
        }
        assert_eq!(events, 1);
    }
}
