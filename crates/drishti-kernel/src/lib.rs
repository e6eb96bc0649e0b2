//! `drishti-kernel` – node health and fail-safe policy.
//!
//! It does not sense or send anything; it keeps the counters and decides when
//! a node must fall back to degraded mode.
//!
//! # Modules
//!
//! - [`health`] – [`NodeHealth`][health::NodeHealth]: consecutive link
//!   failures, last sample time and drop counters, mutated only by the
//!   orchestrator on well-defined events.
//! - [`failsafe`] – [`FailSafePolicy`][failsafe::FailSafePolicy]: turns the
//!   counters into a [`FailSafeStatus`][failsafe::FailSafeStatus] and a
//!   [`LinkAction`][failsafe::LinkAction] after every exhausted send.

pub mod failsafe;
pub mod health;

pub use failsafe::{FailSafePolicy, FailSafeStatus, LinkAction};
pub use health::NodeHealth;
