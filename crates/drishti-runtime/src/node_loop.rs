//! [`NodeOrchestrator`] – the per-node sampling loop.
//!
//! Each tick:
//!
//! 1. **Sample** – read the [`SensorSource`] under `sensor_read_timeout`.
//! 2. **Filter** – push the raw distance into the rolling window and take the
//!    median through [`SignalFilter`]. A run of lost echoes as long as the
//!    filter's minimum window discards the history, so the node stops
//!    reporting an obstacle it can no longer see.
//! 3. **Classify** – feed the acceleration into the [`FallDetector`],
//!    independently of the distance path.
//! 4. **Escalate** – a confirmed fall is sent at once as a `FALL_ALERT`
//!    packet and played locally; it never waits behind routine telemetry.
//! 5. **Transmit** – otherwise assemble a routine telemetry packet and hand it
//!    to the [`LinkLayer`].
//!
//! Every step up to the hand-off is synchronous and bounded. Sends run as
//! spawned tasks, so a packet still retrying never delays the next sample.
//! Their reports come back through a [`JoinSet`] and are the only events,
//! together with fresh samples, that mutate [`NodeHealth`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drishti_link::{LinkLayer, LossyTransport};
//! use drishti_runtime::config::NodeConfig;
//! use drishti_runtime::node_loop::NodeOrchestrator;
//! use drishti_runtime::sensor::{SimulatedWalk, WalkProfile};
//!
//! # async fn demo() {
//! let config = NodeConfig::default();
//! let link = LinkLayer::new(Arc::new(LossyTransport::new(0.1, 7)), config.retry_policy());
//! let node = NodeOrchestrator::new(config, link).expect("valid config");
//! let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let summary = node.run(SimulatedWalk::new(WalkProfile::default(), 7), stop_rx).await;
//! println!("{summary:?}");
//! # }
//! ```

use drishti_hal::{ActuationCommand, ActuationRegistry, BuzzerPattern};
use drishti_kernel::{FailSafePolicy, FailSafeStatus, LinkAction, NodeHealth};
use drishti_link::{LinkLayer, LinkStatsSnapshot, SendReport, SendResult};
use drishti_perception::{BatteryMonitor, DistanceWindow, FallDetector, SignalFilter};
use drishti_types::{
    BATTERY_UNKNOWN_PCT, FallEvent, FilteredDistance, NodeError, Packet, SensorSample, Severity,
    Timestamp, flags,
};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::report::{PacketKind, TelemetryRecord};
use crate::sensor::SensorSource;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// What one sample produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub filtered: FilteredDistance,
    pub fall: Option<FallEvent>,
    /// Kind of packet handed to the link this tick, if any.
    pub sent: Option<PacketKind>,
}

/// Totals reported when [`NodeOrchestrator::run`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub ticks: u64,
    pub missed_reads: u64,
    pub falls_detected: u64,
    pub routine_skipped: u64,
    pub link: LinkStatsSnapshot,
    pub health: NodeHealth,
}

/// Context carried alongside a send so the report can be logged.
#[derive(Debug, Clone, Copy)]
struct SendContext {
    kind: PacketKind,
    temperature_c: Option<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// NodeOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// The transmitting node's control loop.
///
/// Drive it with [`run`][Self::run], or step it by hand with
/// [`on_sample`][Self::on_sample] and [`flush`][Self::flush] in tests.
pub struct NodeOrchestrator {
    config: NodeConfig,
    filter: SignalFilter,
    window: DistanceWindow,
    detector: FallDetector,
    battery: BatteryMonitor,
    health: NodeHealth,
    failsafe: FailSafePolicy,
    link: LinkLayer,
    local: Option<ActuationRegistry>,
    /// When the local alert pattern runs out.
    local_alert_ends: Option<Timestamp>,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryRecord>>,
    status_tx: watch::Sender<FailSafeStatus>,
    in_flight: JoinSet<(SendReport, SendContext)>,
    routine_in_flight: usize,
    started: Instant,
    next_sequence: u16,
    /// Timestamp of the most recent tick, sampled or missed.
    clock: Timestamp,
    latest: FilteredDistance,
    /// Consecutive samples without an echo.
    lost_echoes: usize,
    latest_temperature: Option<f32>,
    ticks: u64,
    missed_reads: u64,
    routine_skipped: u64,
}

impl NodeOrchestrator {
    /// Build an orchestrator from a validated config.
    ///
    /// # Errors
    ///
    /// [`NodeError::Config`] when `config` fails validation.
    pub fn new(config: NodeConfig, link: LinkLayer) -> Result<Self, NodeError> {
        config.validate()?;
        let (status_tx, _) = watch::channel(FailSafeStatus::default());
        Ok(Self {
            filter: config.signal_filter(),
            window: DistanceWindow::new(config.filter_window),
            detector: FallDetector::new(config.fall_config()),
            battery: BatteryMonitor::new(config.low_battery_pct),
            health: NodeHealth::new(Timestamp::ZERO),
            failsafe: config.failsafe_policy(),
            link,
            local: None,
            local_alert_ends: None,
            telemetry_tx: None,
            status_tx,
            in_flight: JoinSet::new(),
            routine_in_flight: 0,
            started: Instant::now(),
            next_sequence: 0,
            clock: Timestamp::ZERO,
            latest: FilteredDistance::REJECTED,
            lost_echoes: 0,
            latest_temperature: None,
            ticks: 0,
            missed_reads: 0,
            routine_skipped: 0,
            config,
        })
    }

    /// Play alerts on this node's own buzzer as well.
    pub fn with_local_alerts(mut self, registry: ActuationRegistry) -> Self {
        self.local = Some(registry);
        self
    }

    /// Emit a [`TelemetryRecord`] for every completed send.
    pub fn with_telemetry(mut self, tx: mpsc::UnboundedSender<TelemetryRecord>) -> Self {
        self.telemetry_tx = Some(tx);
        self
    }

    /// Subscribe to fail-safe status changes.
    pub fn status(&self) -> watch::Receiver<FailSafeStatus> {
        self.status_tx.subscribe()
    }

    pub fn health(&self) -> &NodeHealth {
        &self.health
    }

    pub fn local_alerts(&self) -> Option<&ActuationRegistry> {
        self.local.as_ref()
    }

    pub fn latest_distance(&self) -> FilteredDistance {
        self.latest
    }

    /// Time since the loop was created, as a node timestamp.
    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.started.elapsed())
    }

    // ── Per-tick work ────────────────────────────────────────────────────────

    /// Process one fresh sample. Never blocks.
    pub fn on_sample(&mut self, sample: SensorSample) -> TickOutcome {
        let at = sample.captured_at;
        self.clock = self.clock.max(at);
        self.ticks += 1;
        self.health.record_sample(at);
        self.expire_local_alert();

        // Distance and motion are independent streams.
        match sample.distance_cm {
            Some(raw) => {
                self.lost_echoes = 0;
                self.window.push(raw);
            }
            None => self.on_lost_echo(at),
        }
        let filtered = self.filter.filter_window(&self.window);
        if sample.distance_cm.is_none() || !filtered.is_valid() {
            self.health.record_invalid_reading();
        }
        self.latest = filtered;

        if let Some(volts) = sample.battery_volts {
            self.battery.record_volts(volts);
        }
        if sample.temperature_c.is_some() {
            self.latest_temperature = sample.temperature_c;
        }

        let fall = self.detector.update(sample.accel, at);
        let sent = match fall {
            Some(event) => {
                self.escalate_fall(&event, at);
                Some(PacketKind::FallAlert)
            }
            None => self.send_routine(PacketKind::Telemetry, at),
        };

        self.publish_status(at);
        TickOutcome {
            filtered,
            fall,
            sent,
        }
    }

    /// The sensor produced nothing this tick.
    pub fn on_missed_sample(&mut self, at: Timestamp, reason: &NodeError) {
        self.clock = self.clock.max(at);
        self.ticks += 1;
        self.missed_reads += 1;
        self.expire_local_alert();
        debug!(%at, error = %reason, "sensor read missed");

        if self.failsafe.sensor_degraded(&self.health, at) {
            // No actuation on stale data.
            if !self.window.is_empty() {
                warn!(silent_for = ?self.health.sensor_silence(at), "sensor degraded; discarding distance history");
                self.window.clear();
            }
            self.latest = FilteredDistance::REJECTED;
            self.send_routine(PacketKind::Status, at);
        }
        self.publish_status(at);
    }

    /// Account for a finished send.
    pub fn on_delivery(&mut self, report: &SendReport) {
        match report.result {
            SendResult::Delivered => self.health.record_delivery_success(),
            SendResult::Exhausted => {
                let streak = self.health.record_link_exhausted();
                match self.failsafe.link_action(&self.health) {
                    LinkAction::Reinitialize => {
                        self.health.record_link_reinitialization();
                        if let Err(e) = self.link.transport().reinitialize() {
                            warn!(error = %e, "link re-initialisation failed");
                        }
                    }
                    LinkAction::Degraded => {
                        warn!(consecutive = streak, "link degraded; packets are not getting through");
                    }
                }
            }
        }
        self.publish_status(self.clock);
    }

    /// Current fail-safe evaluation.
    pub fn evaluate(&self, now: Timestamp) -> FailSafeStatus {
        self.failsafe
            .evaluate(&self.health, now, self.battery.is_low())
    }

    /// Wait for every in-flight send and account for it.
    pub async fn flush(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            self.handle_joined(joined);
        }
    }

    /// Run until `shutdown` flips (or its sender is dropped), then flush.
    pub async fn run(
        mut self,
        mut sensor: impl SensorSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> NodeSummary {
        let mut ticker = interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let read_timeout = self.config.sensor_read_timeout();
        info!(
            node_id = self.config.node_id,
            interval_ms = self.config.sample_interval_ms,
            attempts = self.link.policy().max_attempts,
            "node loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.handle_joined(joined);
                }

                _ = ticker.tick() => {
                    let at = self.now();
                    match timeout(read_timeout, sensor.read(at)).await {
                        Ok(Ok(sample)) => {
                            self.on_sample(sample);
                        }
                        Ok(Err(e)) => self.on_missed_sample(at, &e),
                        Err(_) => {
                            let silent_ms = u64::try_from(read_timeout.as_millis()).unwrap_or(u64::MAX);
                            self.on_missed_sample(at, &NodeError::SensorTimeout { silent_ms });
                        }
                    }
                }
            }
        }

        self.flush().await;
        let summary = self.summary();
        info!(
            ticks = summary.ticks,
            falls = summary.falls_detected,
            delivered = summary.link.delivered,
            exhausted = summary.link.exhausted,
            "node loop stopped"
        );
        summary
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            ticks: self.ticks,
            missed_reads: self.missed_reads,
            falls_detected: self.detector.events_emitted(),
            routine_skipped: self.routine_skipped,
            link: self.link.stats(),
            health: self.health.clone(),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn on_lost_echo(&mut self, at: Timestamp) {
        self.lost_echoes += 1;
        debug!(%at, streak = self.lost_echoes, "no echo this tick");
        if self.lost_echoes >= self.filter.min_len() && !self.window.is_empty() {
            debug!(%at, "echo lost; discarding distance history");
            self.window.clear();
        }
    }

    fn escalate_fall(&mut self, event: &FallEvent, now: Timestamp) {
        let mut bits = flags::FALL_ALERT;
        if event.severity == Severity::High {
            bits |= flags::FALL_SEVERE;
        }
        let packet = self.build_packet(bits, now);
        info!(
            node_id = packet.node_id,
            sequence = packet.sequence,
            severity = ?event.severity,
            "fall alert dispatched"
        );
        self.dispatch(packet, PacketKind::FallAlert);
        self.local_alert(BuzzerPattern::Emergency);
    }

    /// Routine sends are throttled; alerts never go through here.
    fn send_routine(&mut self, kind: PacketKind, now: Timestamp) -> Option<PacketKind> {
        if self.routine_in_flight > 0 {
            self.routine_skipped += 1;
            return None;
        }
        let divisor = u64::from(self.config.low_battery_tx_divisor.max(1));
        if self.battery.is_low() && self.ticks % divisor != 0 {
            self.routine_skipped += 1;
            return None;
        }
        let packet = self.build_packet(0, now);
        self.dispatch(packet, kind);
        Some(kind)
    }

    fn build_packet(&mut self, extra_flags: u8, now: Timestamp) -> Packet {
        let status = self.evaluate(now);
        let (distance_cm, valid_bit) = match self.latest.valid_cm() {
            Some(cm) => (cm.round() as u16, flags::DISTANCE_VALID),
            None => (0, 0),
        };
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Packet {
            node_id: self.config.node_id,
            sequence,
            distance_cm,
            battery_pct: self.battery.percent().unwrap_or(BATTERY_UNKNOWN_PCT),
            flags: valid_bit | status.packet_flags() | extra_flags,
        }
    }

    fn dispatch(&mut self, packet: Packet, kind: PacketKind) {
        if kind != PacketKind::FallAlert {
            self.routine_in_flight += 1;
        }
        let link = self.link.clone();
        let ctx = SendContext {
            kind,
            temperature_c: self.latest_temperature,
        };
        self.in_flight
            .spawn(async move { (link.send(packet).await, ctx) });
    }

    fn handle_joined(&mut self, joined: Result<(SendReport, SendContext), JoinError>) {
        let (report, ctx) = match joined {
            Ok(done) => done,
            Err(e) => {
                // Panicked send task. Its kind is unknown; assume routine so
                // telemetry cannot stall behind a slot that never frees.
                warn!(error = %e, "send task ended abnormally");
                self.routine_in_flight = self.routine_in_flight.saturating_sub(1);
                return;
            }
        };
        if ctx.kind != PacketKind::FallAlert {
            self.routine_in_flight = self.routine_in_flight.saturating_sub(1);
        }
        self.on_delivery(&report);

        let record = TelemetryRecord::from_report(&report, ctx.kind, ctx.temperature_c);
        debug!(line = %record.to_line(), "send finished");
        if let Some(tx) = &self.telemetry_tx {
            // A closed channel means nobody is listening any more.
            let _ = tx.send(record);
        }
    }

    fn publish_status(&mut self, now: Timestamp) {
        let status = self.evaluate(now);
        let previous = *self.status_tx.borrow();
        if previous == status {
            return;
        }
        if status.is_degraded() && !previous.is_degraded() {
            let faults: Vec<String> = self
                .failsafe
                .faults(&self.health, now)
                .iter()
                .map(ToString::to_string)
                .collect();
            warn!(?status, ?faults, "entering degraded mode");
            self.local_alert(BuzzerPattern::Warning);
        } else if !status.is_degraded() && previous.is_degraded() {
            info!("degraded mode cleared");
        }
        if status.low_battery && !previous.low_battery {
            warn!(pct = ?self.battery.percent(), "battery low; reducing transmit rate");
            self.local_alert(BuzzerPattern::LowBattery);
        }
        self.status_tx.send_replace(status);
    }

    fn local_alert(&mut self, pattern: BuzzerPattern) {
        let Some(registry) = self.local.as_mut() else {
            return;
        };
        match registry.apply(ActuationCommand::Alert(pattern)) {
            Ok(()) if registry.playing() == Some(pattern) => {
                self.local_alert_ends = Some(self.clock.offset(pattern.duration()));
            }
            Ok(()) => {}
            Err(e) => warn!(error = %e, ?pattern, "local alert failed"),
        }
    }

    fn expire_local_alert(&mut self) {
        let clock = self.clock;
        if !self.local_alert_ends.is_some_and(|end| clock >= end) {
            return;
        }
        self.local_alert_ends = None;
        if let Some(registry) = self.local.as_mut() {
            if let Err(e) = registry.apply(ActuationCommand::Silence) {
                warn!(error = %e, "failed to silence local buzzer");
            }
        }
    }
}
