//! `drishti-types` – shared vocabulary for every DrishtiGuide crate.
//!
//! Holds the data model that flows through the node pipeline
//! (sample → filter → classify → transmit → actuate) and the workspace-wide
//! [`NodeError`] type.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound of the valid ranging interval (cm, inclusive).
pub const MIN_DISTANCE_CM: f32 = 2.0;
/// Upper bound of the valid ranging interval (cm, inclusive).
pub const MAX_DISTANCE_CM: f32 = 400.0;

// ────────────────────────────────────────────────────────────────────────────
// Time
// ────────────────────────────────────────────────────────────────────────────

/// Monotonic timestamp in milliseconds since node start.
///
/// Wall-clock time never enters the real-time core; only differences between
/// two `Timestamp`s are meaningful.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Node start.
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Build a timestamp from the elapsed time since node start.
    pub fn from_duration(elapsed: Duration) -> Self {
        Self(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero when
    /// `earlier` is actually later.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Return `self` shifted forward by `d`.
    pub fn offset(self, d: Duration) -> Self {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor samples
// ────────────────────────────────────────────────────────────────────────────

/// A 3-axis vector (accelerometer in g, gyroscope in deg/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm `sqrt(x² + y² + z²)`.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One reading of every on-node sensor, taken once per sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Ranging result in cm; `None` when the echo timed out.
    pub distance_cm: Option<f32>,
    /// Acceleration in g.
    pub accel: Vec3,
    /// Angular rate in deg/s.
    pub gyro: Vec3,
    /// Cell voltage, when the battery ADC was read this tick.
    pub battery_volts: Option<f32>,
    /// Board temperature in °C, when available.
    pub temperature_c: Option<f32>,
    pub captured_at: Timestamp,
}

impl SensorSample {
    /// A sample carrying only ranging and acceleration data.
    pub fn new(distance_cm: Option<f32>, accel: Vec3, captured_at: Timestamp) -> Self {
        Self {
            distance_cm,
            accel,
            gyro: Vec3::default(),
            battery_volts: None,
            temperature_c: None,
            captured_at,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Filter output
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of the validity gate applied by the signal filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    /// Inside `[MIN_DISTANCE_CM, MAX_DISTANCE_CM]`.
    Valid,
    /// Computed, but outside the ranging interval.
    OutOfRange,
    /// Not enough raw readings to compute a value.
    Rejected,
}

/// A denoised distance and its validity.
///
/// Invariant: `MIN_DISTANCE_CM <= value_cm <= MAX_DISTANCE_CM` whenever
/// `validity == Validity::Valid`. `value_cm` is `0.0` for `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredDistance {
    pub value_cm: f32,
    pub validity: Validity,
}

impl FilteredDistance {
    pub const REJECTED: FilteredDistance = FilteredDistance {
        value_cm: 0.0,
        validity: Validity::Rejected,
    };

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    /// The distance, only when it passed the validity gate.
    pub fn valid_cm(&self) -> Option<f32> {
        self.is_valid().then_some(self.value_cm)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fall events
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    High,
}

/// A completed free-fall → impact pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallEvent {
    pub detected_at: Timestamp,
    pub severity: Severity,
    /// `(free_fall_start, impact_time)`.
    pub trigger_window: (Timestamp, Timestamp),
    /// Largest magnitude seen at impact (g).
    pub peak_g: f32,
    /// Smallest magnitude seen during free fall (g).
    pub min_g: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Packets
// ────────────────────────────────────────────────────────────────────────────

/// Bit assignments for [`Packet::flags`].
pub mod flags {
    /// `distance_cm` passed the validity gate.
    pub const DISTANCE_VALID: u8 = 0x01;
    /// A fall was confirmed on the sending node.
    pub const FALL_ALERT: u8 = 0x02;
    /// The fall was classified [`Severity::High`](crate::Severity::High).
    pub const FALL_SEVERE: u8 = 0x04;
    pub const LOW_BATTERY: u8 = 0x08;
    /// No fresh sample for longer than the sensor timeout.
    pub const SENSOR_DEGRADED: u8 = 0x10;
    /// Consecutive delivery failures reached the degrade limit.
    pub const LINK_DEGRADED: u8 = 0x20;
}

/// `Packet::battery_pct` value meaning "no voltage reading yet".
pub const BATTERY_UNKNOWN_PCT: u8 = 255;

/// Fixed-layout telemetry unit exchanged between nodes.
///
/// The checksum is not stored here; it is produced and verified by the
/// wire codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Packet {
    pub node_id: u8,
    pub sequence: u16,
    pub distance_cm: u16,
    /// Charge in `0..=100`, or [`BATTERY_UNKNOWN_PCT`] when the sender has
    /// not measured its battery yet.
    pub battery_pct: u8,
    pub flags: u8,
}

impl Packet {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Distance in cm, only when the sender marked it valid.
    pub fn valid_distance(&self) -> Option<f32> {
        self.has_flag(flags::DISTANCE_VALID)
            .then_some(f32::from(self.distance_cm))
    }

    pub fn is_fall_alert(&self) -> bool {
        self.has_flag(flags::FALL_ALERT)
    }

    /// Battery charge, unless the sender did not know it.
    pub fn battery_level(&self) -> Option<u8> {
        (self.battery_pct <= 100).then_some(self.battery_pct)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actuators
// ────────────────────────────────────────────────────────────────────────────

/// Identifier of one haptic motor, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActuatorId(u8);

impl ActuatorId {
    /// Highest id an [`ActuatorSet`] can hold.
    pub const MAX: u8 = 8;

    /// Returns `None` when `id` is outside `1..=ActuatorId::MAX`.
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "motor{}", self.0)
    }
}

/// A set of [`ActuatorId`]s, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuatorSet(u8);

impl ActuatorSet {
    pub const EMPTY: ActuatorSet = ActuatorSet(0);

    /// The set `{1, 2, …, n}` (capped at [`ActuatorId::MAX`]).
    pub fn first(n: u8) -> Self {
        let n = n.min(ActuatorId::MAX);
        if n == 0 {
            return Self::EMPTY;
        }
        Self((((1u16) << n) - 1) as u8)
    }

    pub fn insert(&mut self, id: ActuatorId) {
        self.0 |= 1 << (id.get() - 1);
    }

    pub fn contains(&self, id: ActuatorId) -> bool {
        self.0 & (1 << (id.get() - 1)) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` when every member of `other` is also in `self`.
    pub fn is_superset(&self, other: &ActuatorSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = ActuatorId> + '_ {
        (1..=ActuatorId::MAX)
            .filter_map(ActuatorId::new)
            .filter(move |id| self.contains(*id))
    }

    /// Raw ids in ascending order; convenient in assertions and logs.
    pub fn ids(&self) -> Vec<u8> {
        self.iter().map(ActuatorId::get).collect()
    }
}

impl FromIterator<ActuatorId> for ActuatorSet {
    fn from_iter<I: IntoIterator<Item = ActuatorId>>(iter: I) -> Self {
        let mut set = ActuatorSet::EMPTY;
        for id in iter {
            set.insert(id);
        }
        set
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Why a received frame could not be turned into a [`Packet`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("frame length {actual} does not match packet length {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("checksum mismatch: frame carries {expected:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

/// Workspace-wide error type.
///
/// None of these conditions halts a node; callers count, log, and continue,
/// escalating only sustained failures to the fail-safe status.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeError {
    #[error("Sensor Timeout: no fresh sample for {silent_ms} ms")]
    SensorTimeout { silent_ms: u64 },

    #[error("Communication Failure: {consecutive} consecutive undelivered packets")]
    CommunicationFailure { consecutive: u32 },

    #[error("Invalid Reading: {0}")]
    InvalidReading(String),

    #[error("Decode Error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Hardware Fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_magnitude() {
        let v = Vec3::new(0.5, 0.3, 1.0);
        let expected = (0.25f32 + 0.09 + 1.0).sqrt();
        assert!((v.magnitude() - expected).abs() < 1e-6);
        assert!((Vec3::new(0.0, 0.0, 1.0).magnitude() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn timestamp_since_saturates() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(350);
        assert_eq!(b.since(a), Duration::from_millis(250));
        assert_eq!(a.since(b), Duration::ZERO);
        assert_eq!(a.offset(Duration::from_millis(50)), Timestamp::from_millis(150));
    }

    #[test]
    fn unknown_battery_is_not_a_level() {
        let mut packet = Packet {
            battery_pct: BATTERY_UNKNOWN_PCT,
            ..Packet::default()
        };
        assert_eq!(packet.battery_level(), None);
        packet.battery_pct = 0;
        assert_eq!(packet.battery_level(), Some(0));
        packet.battery_pct = 100;
        assert_eq!(packet.battery_level(), Some(100));
    }

    #[test]
    fn filtered_distance_valid_cm() {
        let ok = FilteredDistance {
            value_cm: 42.0,
            validity: Validity::Valid,
        };
        assert_eq!(ok.valid_cm(), Some(42.0));
        let far = FilteredDistance {
            value_cm: 500.0,
            validity: Validity::OutOfRange,
        };
        assert_eq!(far.valid_cm(), None);
        assert_eq!(FilteredDistance::REJECTED.valid_cm(), None);
    }

    #[test]
    fn packet_flag_helpers() {
        let packet = Packet {
            node_id: 1,
            sequence: 7,
            distance_cm: 55,
            battery_pct: 80,
            flags: flags::DISTANCE_VALID | flags::FALL_ALERT,
        };
        assert_eq!(packet.valid_distance(), Some(55.0));
        assert!(packet.is_fall_alert());
        assert!(!packet.has_flag(flags::LOW_BATTERY));

        let invalid = Packet { flags: 0, ..packet };
        assert_eq!(invalid.valid_distance(), None);
    }

    #[test]
    fn actuator_id_bounds() {
        assert!(ActuatorId::new(0).is_none());
        assert!(ActuatorId::new(9).is_none());
        assert_eq!(ActuatorId::new(3).map(ActuatorId::get), Some(3));
    }

    #[test]
    fn actuator_set_first_and_superset() {
        let three = ActuatorSet::first(3);
        assert_eq!(three.ids(), vec![1, 2, 3]);
        assert_eq!(three.len(), 3);
        assert!(ActuatorSet::first(5).is_superset(&three));
        assert!(!three.is_superset(&ActuatorSet::first(4)));
        assert!(ActuatorSet::first(0).is_empty());
        assert_eq!(ActuatorSet::first(8).len(), 8);
    }

    #[test]
    fn actuator_set_from_iter() {
        let set: ActuatorSet = [2u8, 5]
            .into_iter()
            .filter_map(ActuatorId::new)
            .collect();
        assert_eq!(set.ids(), vec![2, 5]);
    }

    #[test]
    fn packet_serialization_roundtrip() {
        let packet = Packet {
            node_id: 3,
            sequence: 513,
            distance_cm: 120,
            battery_pct: 64,
            flags: flags::DISTANCE_VALID,
        };
        let json = serde_json::to_string(&packet).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(packet, back);
    }

    #[test]
    fn node_error_display() {
        let err = NodeError::CommunicationFailure { consecutive: 5 };
        assert!(err.to_string().contains("Communication Failure"));

        let err2: NodeError = DecodeError::WrongLength {
            expected: 9,
            actual: 4,
        }
        .into();
        assert!(err2.to_string().contains("frame length 4"));
    }
}
