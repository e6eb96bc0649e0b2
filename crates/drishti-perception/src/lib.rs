//! `drishti-perception` – on-node signal processing.
//!
//! Turns noisy raw sensor streams into the validated values the rest of the
//! node acts on. Everything here is pure and allocation-light so it can run
//! inside one sampling tick.
//!
//! # Modules
//!
//! - [`signal_filter`] – [`SignalFilter`][signal_filter::SignalFilter]:
//!   median filter plus `[2, 400]` cm validity gate over a rolling
//!   [`DistanceWindow`][signal_filter::DistanceWindow] of ranging readings,
//!   and the [`ChangeGate`][signal_filter::ChangeGate] that suppresses
//!   actuator flicker on jitter.
//! - [`fall_detector`] – [`FallDetector`][fall_detector::FallDetector]:
//!   explicit `Idle → FreeFall → Impact → Confirmed` state machine over the
//!   acceleration magnitude stream.
//! - [`battery`] – [`BatteryMonitor`][battery::BatteryMonitor]: voltage to
//!   percent conversion with moving-average smoothing.

pub mod battery;
pub mod fall_detector;
pub mod signal_filter;

pub use battery::BatteryMonitor;
pub use fall_detector::{FallConfig, FallDetector, FallState, ImpactPolicy};
pub use signal_filter::{ChangeGate, DistanceWindow, SignalFilter};
