//! `drishti-runtime` – the node control loops.
//!
//! Wires perception, the link layer, and actuation into the two halves of a
//! Drishti deployment: the wearable transmitting node and the receiving node
//! that drives the haptic array.
//!
//! # Modules
//!
//! - [`node_loop`] – [`NodeOrchestrator`][node_loop::NodeOrchestrator]:
//!   the per-tick sample → filter → classify → transmit cycle. Fall alerts
//!   bypass routine telemetry; sends run off-tick so retries never delay the
//!   next sample.
//! - [`receiver`] – [`ReceiverNode`][receiver::ReceiverNode]: decodes and
//!   deduplicates frames, then maps distance onto haptic bands and flags onto
//!   buzzer alerts. Switches everything off on link silence.
//! - [`sensor`] – the [`SensorSource`][sensor::SensorSource] trait plus a
//!   scripted replay source and a seeded walking simulation.
//! - [`config`] – [`NodeConfig`][config::NodeConfig], loaded from
//!   `~/.drishti/config.toml` with `DRISHTI_*` overrides and a
//!   `[calibration]` table.
//! - [`report`] – [`TelemetryRecord`][report::TelemetryRecord]: one line (or
//!   JSON object) per completed send for external tooling.
//! - [`logging`] – [`init_tracing`][logging::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod config;
pub mod logging;
pub mod node_loop;
pub mod receiver;
pub mod report;
pub mod sensor;

pub use config::NodeConfig;
pub use logging::{TracerProviderGuard, init_tracing};
pub use node_loop::{NodeOrchestrator, NodeSummary, TickOutcome};
pub use receiver::{ReceiverNode, ReceiverSummary};
pub use report::{PacketKind, TelemetryRecord};
pub use sensor::{ReplaySensor, ReplayStep, SensorSource, SimulatedWalk, WalkProfile};
