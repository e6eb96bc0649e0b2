//! Distance-to-haptics mapping.
//!
//! The closer the obstacle, the more motors vibrate:
//!
//! | Distance (cm) | Motors |
//! |---|---|
//! | `80 < d ≤ 100` | {1} |
//! | `60 < d ≤ 80` | {1,2} |
//! | `40 < d ≤ 60` | {1,2,3} |
//! | `20 < d ≤ 40` | {1,2,3,4} |
//! | `0 ≤ d ≤ 20` | {1,2,3,4,5} |
//! | `d > 100`, negative, NaN | {} |
//!
//! The active set is `{1..=k}` where `k` counts the band edges at or above
//! `d`. Moving closer can only raise `k`, so a motor that is on never turns
//! off while the obstacle approaches.
//!
//! # Example
//!
//! ```rust
//! use drishti_hal::haptic::HapticMapper;
//!
//! let mapper = HapticMapper::default();
//! assert_eq!(mapper.motors_for(70.0).ids(), vec![1, 2]);
//! assert!(mapper.motors_for(150.0).is_empty());
//! ```

use drishti_types::{ActuatorId, ActuatorSet};

/// Upper band edges (cm), farthest first. One motor per edge.
pub const DEFAULT_BAND_EDGES_CM: [f32; 5] = [100.0, 80.0, 60.0, 40.0, 20.0];

/// Number of motors in the standard wearable array.
pub const HAPTIC_MOTOR_COUNT: u8 = DEFAULT_BAND_EDGES_CM.len() as u8;

/// Pure, total mapping from distance to [`ActuatorSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct HapticMapper {
    edges_cm: Vec<f32>,
}

impl HapticMapper {
    /// Build a mapper from arbitrary band edges.
    ///
    /// Edges are sorted farthest first; non-finite edges are discarded and at
    /// most [`ActuatorId::MAX`] are kept.
    pub fn from_edges(edges_cm: impl IntoIterator<Item = f32>) -> Self {
        let mut edges_cm: Vec<f32> = edges_cm.into_iter().filter(|e| e.is_finite()).collect();
        edges_cm.sort_by(|a, b| b.total_cmp(a));
        edges_cm.truncate(usize::from(ActuatorId::MAX));
        Self { edges_cm }
    }

    /// Motors to energise for an obstacle at `distance_cm`.
    pub fn motors_for(&self, distance_cm: f32) -> ActuatorSet {
        if !distance_cm.is_finite() || distance_cm < 0.0 {
            return ActuatorSet::EMPTY;
        }
        let k = self.edges_cm.iter().filter(|edge| distance_cm <= **edge).count();
        // k <= ActuatorId::MAX by construction.
        ActuatorSet::first(k as u8)
    }

    /// Number of motors this mapper can address.
    pub fn motor_count(&self) -> u8 {
        self.edges_cm.len() as u8
    }

    /// Farthest distance that still produces any actuation.
    pub fn max_range_cm(&self) -> Option<f32> {
        self.edges_cm.first().copied()
    }
}

impl Default for HapticMapper {
    fn default() -> Self {
        Self::from_edges(DEFAULT_BAND_EDGES_CM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_points() {
        let mapper = HapticMapper::default();
        assert_eq!(mapper.motors_for(90.0).ids(), vec![1]);
        assert_eq!(mapper.motors_for(70.0).ids(), vec![1, 2]);
        assert_eq!(mapper.motors_for(50.0).ids(), vec![1, 2, 3]);
        assert_eq!(mapper.motors_for(30.0).ids(), vec![1, 2, 3, 4]);
        assert_eq!(mapper.motors_for(10.0).ids(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn boundaries_resolve_to_closer_bucket() {
        let mapper = HapticMapper::default();
        assert_eq!(mapper.motors_for(100.0).len(), 1);
        assert_eq!(mapper.motors_for(80.0).len(), 2);
        assert_eq!(mapper.motors_for(60.0).len(), 3);
        assert_eq!(mapper.motors_for(40.0).len(), 4);
        assert_eq!(mapper.motors_for(20.0).len(), 5);
        assert_eq!(mapper.motors_for(0.0).len(), 5);
    }

    #[test]
    fn out_of_range_and_invalid_is_empty() {
        let mapper = HapticMapper::default();
        assert!(mapper.motors_for(100.01).is_empty());
        assert!(mapper.motors_for(400.0).is_empty());
        assert!(mapper.motors_for(f32::INFINITY).is_empty());
        assert!(mapper.motors_for(f32::NAN).is_empty());
        assert!(mapper.motors_for(-1.0).is_empty());
    }

    #[test]
    fn approaching_never_drops_a_motor() {
        let mapper = HapticMapper::default();
        let mut previous = mapper.motors_for(150.0);
        // Sweep from 150 cm down to 0 in 0.25 cm steps.
        for step in (0..=600).rev() {
            let d = step as f32 * 0.25;
            let current = mapper.motors_for(d);
            assert!(
                current.is_superset(&previous),
                "dropped motor at {d} cm: {:?} -> {:?}",
                previous.ids(),
                current.ids()
            );
            previous = current;
        }
    }

    #[test]
    fn custom_edges_are_sorted() {
        let mapper = HapticMapper::from_edges([50.0, 150.0, f32::NAN, 100.0]);
        assert_eq!(mapper.motor_count(), 3);
        assert_eq!(mapper.max_range_cm(), Some(150.0));
        assert_eq!(mapper.motors_for(120.0).ids(), vec![1]);
        assert_eq!(mapper.motors_for(50.0).ids(), vec![1, 2, 3]);
    }

    #[test]
    fn default_matches_motor_count() {
        assert_eq!(HapticMapper::default().motor_count(), HAPTIC_MOTOR_COUNT);
    }
}
