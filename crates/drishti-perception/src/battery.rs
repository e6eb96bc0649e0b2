//! Battery level estimation.
//!
//! The node reads a single Li-ion cell through an ADC divider. Voltage maps
//! linearly onto charge between [`EMPTY_VOLTS`] and [`FULL_VOLTS`]; a short
//! moving average keeps ADC noise from toggling the low-battery flag.

use std::collections::VecDeque;

use tracing::debug;

pub const FULL_VOLTS: f32 = 4.2;
pub const EMPTY_VOLTS: f32 = 3.0;
/// Readings averaged by [`BatteryMonitor`].
pub const SMOOTHING_WINDOW: usize = 3;
/// Percent below which the battery is reported low.
pub const DEFAULT_LOW_BATTERY_PCT: u8 = 20;

/// Convert a cell voltage into a charge percentage in `0..=100`.
pub fn volts_to_percent(volts: f32) -> u8 {
    if !volts.is_finite() {
        return 0;
    }
    let pct = (volts - EMPTY_VOLTS) / (FULL_VOLTS - EMPTY_VOLTS) * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

/// Smoothed battery percentage tracker.
#[derive(Debug, Clone)]
pub struct BatteryMonitor {
    low_threshold_pct: u8,
    recent: VecDeque<f32>,
}

impl BatteryMonitor {
    pub fn new(low_threshold_pct: u8) -> Self {
        Self {
            low_threshold_pct,
            recent: VecDeque::with_capacity(SMOOTHING_WINDOW),
        }
    }

    /// Record one voltage reading and return the smoothed percentage.
    pub fn record_volts(&mut self, volts: f32) -> u8 {
        if volts.is_finite() {
            if self.recent.len() == SMOOTHING_WINDOW {
                self.recent.pop_front();
            }
            self.recent.push_back(volts);
        } else {
            debug!(volts, "ignoring non-finite battery reading");
        }
        self.percent().unwrap_or(0)
    }

    /// Smoothed charge, or `None` before the first reading.
    pub fn percent(&self) -> Option<u8> {
        if self.recent.is_empty() {
            return None;
        }
        let mean = self.recent.iter().sum::<f32>() / self.recent.len() as f32;
        Some(volts_to_percent(mean))
    }

    /// `true` strictly below the low threshold. Unknown charge is not low.
    pub fn is_low(&self) -> bool {
        self.percent()
            .is_some_and(|pct| pct < self.low_threshold_pct)
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BATTERY_PCT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voltage_to_percent_mapping() {
        assert_eq!(volts_to_percent(4.2), 100);
        assert_eq!(volts_to_percent(3.6), 50);
        assert_eq!(volts_to_percent(3.0), 0);
        assert_eq!(volts_to_percent(4.5), 100);
        assert_eq!(volts_to_percent(2.5), 0);
        assert_eq!(volts_to_percent(f32::NAN), 0);
    }

    #[test]
    fn low_threshold_is_strict() {
        let mut monitor = BatteryMonitor::new(20);
        // 3.24 V → 20 %
        monitor.record_volts(3.24);
        assert_eq!(monitor.percent(), Some(20));
        assert!(!monitor.is_low());

        let mut monitor = BatteryMonitor::new(20);
        monitor.record_volts(3.18); // 15 %
        assert!(monitor.is_low());
    }

    #[test]
    fn unknown_charge_is_not_low() {
        let monitor = BatteryMonitor::default();
        assert_eq!(monitor.percent(), None);
        assert!(!monitor.is_low());
    }

    #[test]
    fn smoothing_damps_single_dip() {
        let mut monitor = BatteryMonitor::new(20);
        monitor.record_volts(3.9);
        monitor.record_volts(3.9);
        // One noisy sample far below the threshold voltage.
        let pct = monitor.record_volts(3.0);
        assert!(pct >= 50, "smoothed percent {pct}");
        assert!(!monitor.is_low());
    }

    #[test]
    fn window_forgets_old_readings() {
        let mut monitor = BatteryMonitor::new(20);
        monitor.record_volts(4.2);
        for _ in 0..SMOOTHING_WINDOW {
            monitor.record_volts(3.0);
        }
        assert_eq!(monitor.percent(), Some(0));
        assert!(monitor.is_low());
    }
}
