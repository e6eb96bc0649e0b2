//! Ranging signal filter.
//!
//! Ultrasonic ranging produces occasional wild spikes (multipath echoes,
//! missed pulses). A median over a short rolling window rejects a single
//! spike outright, without the lag a mean filter would add.
//!
//! # Example
//!
//! ```rust
//! use drishti_perception::signal_filter::SignalFilter;
//! use drishti_types::Validity;
//!
//! let filter = SignalFilter::new(1);
//! let out = filter.filter(&[25.0, 27.0, 26.0, 150.0, 24.0, 28.0, 26.0, 25.0, 27.0]);
//! assert_eq!(out.validity, Validity::Valid);
//! assert!((out.value_cm - 26.0).abs() < f32::EPSILON);
//! ```

use std::collections::VecDeque;

use drishti_types::{FilteredDistance, MAX_DISTANCE_CM, MIN_DISTANCE_CM, Validity};
use tracing::debug;

/// Speed of sound used to turn echo time into distance (cm/µs).
pub const SPEED_OF_SOUND_CM_PER_US: f32 = 0.034;

/// Default rolling window length. Odd, so the median is a real sample.
pub const DEFAULT_WINDOW_LEN: usize = 9;

/// Two valid readings closer than this are treated as the same distance.
pub const DEFAULT_CHANGE_THRESHOLD_CM: f32 = 3.0;

/// Longest echo wait before a ping counts as lost (µs).
pub const ECHO_TIMEOUT_US: f32 = 30_000.0;

/// Convert an ultrasonic echo round-trip time (µs) into a one-way distance
/// in cm.
pub fn pulse_to_cm(echo_us: f32) -> f32 {
    echo_us * SPEED_OF_SOUND_CM_PER_US / 2.0
}

// ────────────────────────────────────────────────────────────────────────────
// SignalFilter
// ────────────────────────────────────────────────────────────────────────────

/// Median filter with a validity gate.
///
/// Windows shorter than `min_len` are [`Validity::Rejected`] immediately;
/// the caller decides whether to hold its last known good value.
#[derive(Debug, Clone)]
pub struct SignalFilter {
    min_len: usize,
    offset_cm: f32,
}

impl SignalFilter {
    /// Create a filter requiring at least `min_len` readings (minimum 1).
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len: min_len.max(1),
            offset_cm: 0.0,
        }
    }

    /// Apply a calibration offset, added to the median before gating.
    pub fn with_offset(mut self, offset_cm: f32) -> Self {
        self.offset_cm = offset_cm;
        self
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    pub fn offset_cm(&self) -> f32 {
        self.offset_cm
    }

    /// Filter an ordered window of raw distance readings (cm).
    pub fn filter(&self, window: &[f32]) -> FilteredDistance {
        self.filter_readings(window.iter().copied())
    }

    /// Filter the current contents of a [`DistanceWindow`].
    pub fn filter_window(&self, window: &DistanceWindow) -> FilteredDistance {
        self.filter_readings(window.iter())
    }

    fn filter_readings(&self, readings: impl Iterator<Item = f32>) -> FilteredDistance {
        // Non-finite readings are driver garbage, never a distance.
        let mut values: Vec<f32> = readings.filter(|v| v.is_finite()).collect();
        if values.len() < self.min_len {
            return FilteredDistance::REJECTED;
        }
        let Some(median) = median(&mut values) else {
            return FilteredDistance::REJECTED;
        };

        let value_cm = median + self.offset_cm;
        let validity = if (MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&value_cm) {
            Validity::Valid
        } else {
            debug!(value_cm, "filtered distance outside ranging interval");
            Validity::OutOfRange
        };
        FilteredDistance { value_cm, validity }
    }
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Median of `values`, reordering the slice in place.
///
/// Even-length input averages the two middle elements. Returns `None` for an
/// empty slice.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DistanceWindow
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity rolling buffer of the most recent raw readings.
#[derive(Debug, Clone)]
pub struct DistanceWindow {
    capacity: usize,
    readings: VecDeque<f32>,
}

impl DistanceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, evicting the oldest once full.
    pub fn push(&mut self, reading_cm: f32) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading_cm);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readings oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.readings.iter().copied()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

impl Default for DistanceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEN)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ChangeGate
// ────────────────────────────────────────────────────────────────────────────

/// Suppresses re-actuation on sensor jitter.
///
/// A reading is *significant* when there is no previous accepted value or
/// when it differs from that value by at least `threshold_cm`.
#[derive(Debug, Clone)]
pub struct ChangeGate {
    threshold_cm: f32,
    last_cm: Option<f32>,
}

impl ChangeGate {
    pub fn new(threshold_cm: f32) -> Self {
        Self {
            threshold_cm: threshold_cm.max(0.0),
            last_cm: None,
        }
    }

    /// Whether `value_cm` differs enough from the last committed value.
    pub fn is_significant(&self, value_cm: f32) -> bool {
        match self.last_cm {
            None => true,
            Some(last) => (value_cm - last).abs() >= self.threshold_cm,
        }
    }

    /// Remember `value_cm` as the last acted-on value. Callers that act on a
    /// reading commit it only once the action has taken effect.
    pub fn commit(&mut self, value_cm: f32) {
        self.last_cm = Some(value_cm);
    }

    /// Last accepted value.
    pub fn last(&self) -> Option<f32> {
        self.last_cm
    }

    /// Forget the last value so the next reading is always significant.
    pub fn reset(&mut self) {
        self.last_cm = None;
    }
}

impl Default for ChangeGate {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_THRESHOLD_CM)
    }
}
