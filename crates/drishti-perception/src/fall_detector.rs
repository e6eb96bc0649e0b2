//! Fall detection state machine.
//!
//! A fall shows up on the accelerometer as a short period of near-weightless
//! free fall followed by a hard impact. Neither crossing alone is a fall:
//! walking produces brief dips and jolts all the time. The detector only
//! fires on the ordered pattern *low-g, then high-g, within a bounded
//! window*.
//!
//! ```text
//!            m < low_g                 m > high_g (within window)
//!   Idle ───────────────▶ FreeFall ──────────────────────────────▶ Impact
//!    ▲                       │                                       │
//!    │   window exceeded     │                                       │
//!    ├───────────────────────┘                                       │
//!    │                                                               ▼
//!    └──────────────────────── auto-reset ◀──────────────────── Confirmed
//! ```
//!
//! Every transition goes through [`transition`], a pure function of the
//! current state, one magnitude sample, and the config.
//!
//! # Example
//!
//! ```rust
//! use drishti_perception::fall_detector::FallDetector;
//! use drishti_types::Timestamp;
//!
//! let mut detector = FallDetector::default();
//! let trace = [1.0, 0.2, 0.1, 3.5, 1.8, 1.0];
//! let events: Vec<_> = trace
//!     .iter()
//!     .enumerate()
//!     .filter_map(|(i, m)| detector.update_magnitude(*m, Timestamp::from_millis(i as u64 * 200)))
//!     .collect();
//! assert_eq!(events.len(), 1);
//! ```

use std::time::Duration;

use drishti_types::{FallEvent, Severity, Timestamp, Vec3};
use tracing::{debug, info};

/// Magnitude below which the wearer is considered in free fall (g).
pub const LOW_G_THRESHOLD: f32 = 0.3;
/// Magnitude above which a sample counts as an impact (g).
pub const HIGH_G_THRESHOLD: f32 = 2.8;
/// Longest plausible time between free-fall onset and impact.
pub const MAX_FALL_WINDOW: Duration = Duration::from_millis(1000);

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// What has to happen after the impact sample before a fall is confirmed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImpactPolicy {
    /// The impact itself confirms the fall; severity is always `High`.
    ImpactOnly,
    /// Watch the wearer after impact. `settle_samples` consecutive samples
    /// within `settle_tolerance_g` of 1 g (lying still) confirm a `High`
    /// severity fall; still moving when `settle_window` runs out confirms a
    /// `Low` severity one.
    RequireSettle {
        settle_window: Duration,
        settle_samples: u8,
        settle_tolerance_g: f32,
    },
}

/// Thresholds and timing for [`FallDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallConfig {
    pub low_g: f32,
    pub high_g: f32,
    pub max_fall_window: Duration,
    pub policy: ImpactPolicy,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            low_g: LOW_G_THRESHOLD,
            high_g: HIGH_G_THRESHOLD,
            max_fall_window: MAX_FALL_WINDOW,
            policy: ImpactPolicy::ImpactOnly,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// States
// ────────────────────────────────────────────────────────────────────────────

/// Detector state. Each variant carries exactly the data needed to leave it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallState {
    Idle,
    FreeFall {
        started_at: Timestamp,
        min_g: f32,
    },
    Impact {
        free_fall_start: Timestamp,
        impact_at: Timestamp,
        peak_g: f32,
        min_g: f32,
        settled: u8,
    },
    /// Terminal for one event; the detector resets to `Idle` right after.
    Confirmed(FallEvent),
}

/// Advance `state` by one magnitude sample `m` taken at `at`.
///
/// `Confirmed` behaves like `Idle` as an input state: the next sample is
/// evaluated fresh. A free-fall window that has expired is abandoned and the
/// current sample is evaluated again from `Idle`, so a new sub-threshold
/// sample opens a new, independent window at its own timestamp.
pub fn transition(state: FallState, m: f32, at: Timestamp, config: &FallConfig) -> FallState {
    match state {
        FallState::Idle | FallState::Confirmed(_) => {
            if m < config.low_g {
                FallState::FreeFall {
                    started_at: at,
                    min_g: m,
                }
            } else {
                FallState::Idle
            }
        }

        FallState::FreeFall { started_at, min_g } => {
            if at.since(started_at) > config.max_fall_window {
                return transition(FallState::Idle, m, at, config);
            }
            if m > config.high_g {
                return enter_impact(started_at, at, m, min_g, config);
            }
            FallState::FreeFall {
                started_at,
                min_g: min_g.min(m),
            }
        }

        FallState::Impact {
            free_fall_start,
            impact_at,
            peak_g,
            min_g,
            settled,
        } => {
            let ImpactPolicy::RequireSettle {
                settle_window,
                settle_samples,
                settle_tolerance_g,
            } = config.policy
            else {
                // Not reachable under ImpactOnly: enter_impact confirms at once.
                return confirm(free_fall_start, impact_at, at, peak_g, min_g, Severity::High);
            };

            let peak_g = peak_g.max(m);
            let settled = if (m - 1.0).abs() <= settle_tolerance_g {
                settled.saturating_add(1)
            } else {
                0
            };

            if settled >= settle_samples {
                confirm(free_fall_start, impact_at, at, peak_g, min_g, Severity::High)
            } else if at.since(impact_at) > settle_window {
                confirm(free_fall_start, impact_at, at, peak_g, min_g, Severity::Low)
            } else {
                FallState::Impact {
                    free_fall_start,
                    impact_at,
                    peak_g,
                    min_g,
                    settled,
                }
            }
        }
    }
}

fn enter_impact(
    free_fall_start: Timestamp,
    impact_at: Timestamp,
    peak_g: f32,
    min_g: f32,
    config: &FallConfig,
) -> FallState {
    match config.policy {
        ImpactPolicy::ImpactOnly => confirm(
            free_fall_start,
            impact_at,
            impact_at,
            peak_g,
            min_g,
            Severity::High,
        ),
        ImpactPolicy::RequireSettle { .. } => FallState::Impact {
            free_fall_start,
            impact_at,
            peak_g,
            min_g,
            settled: 0,
        },
    }
}

fn confirm(
    free_fall_start: Timestamp,
    impact_at: Timestamp,
    detected_at: Timestamp,
    peak_g: f32,
    min_g: f32,
    severity: Severity,
) -> FallState {
    FallState::Confirmed(FallEvent {
        detected_at,
        severity,
        trigger_window: (free_fall_start, impact_at),
        peak_g,
        min_g,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// FallDetector
// ────────────────────────────────────────────────────────────────────────────

/// Stateful wrapper around [`transition`] that emits [`FallEvent`]s.
#[derive(Debug, Clone)]
pub struct FallDetector {
    config: FallConfig,
    state: FallState,
    events_emitted: u64,
    windows_timed_out: u64,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            state: FallState::Idle,
            events_emitted: 0,
            windows_timed_out: 0,
        }
    }

    /// Feed one accelerometer sample (g).
    pub fn update(&mut self, accel: Vec3, at: Timestamp) -> Option<FallEvent> {
        self.update_magnitude(accel.magnitude(), at)
    }

    /// Feed one precomputed acceleration magnitude (g).
    ///
    /// Non-finite magnitudes are ignored and leave the state unchanged.
    pub fn update_magnitude(&mut self, m: f32, at: Timestamp) -> Option<FallEvent> {
        if !m.is_finite() {
            return None;
        }

        if let FallState::FreeFall { started_at, .. } = self.state {
            if at.since(started_at) > self.config.max_fall_window {
                self.windows_timed_out += 1;
                debug!(%started_at, %at, "free-fall window expired without impact");
            }
        }

        match transition(self.state, m, at, &self.config) {
            FallState::Confirmed(event) => {
                self.state = FallState::Idle;
                self.events_emitted += 1;
                info!(
                    severity = ?event.severity,
                    peak_g = event.peak_g,
                    min_g = event.min_g,
                    detected_at = %event.detected_at,
                    "fall confirmed"
                );
                Some(event)
            }
            next => {
                self.state = next;
                None
            }
        }
    }

    pub fn state(&self) -> FallState {
        self.state
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    pub fn windows_timed_out(&self) -> u64 {
        self.windows_timed_out
    }

    /// Drop any partial pattern and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = FallState::Idle;
    }
}

impl Default for FallDetector {
    fn default() -> Self {
        Self::new(FallConfig::default())
    }
}
