//! [`ReceiverNode`] – the actuating side of the link.
//!
//! Frames from a transmitting node are decoded and deduplicated by
//! [`LinkReceiver`], then turned into [`ActuationCommand`]s:
//!
//! | Condition | Command |
//! |---|---|
//! | `FALL_ALERT` | `Alert(Emergency)` |
//! | first frame after a silence | `Alert(Double)` |
//! | `LOW_BATTERY` rising edge | `Alert(LowBattery)` |
//! | `SENSOR_DEGRADED` rising edge | `AllOff` |
//! | valid distance, significant change | `Haptics(mapper.motors_for(d))` |
//! | distance no longer valid | `Haptics(EMPTY)` |
//! | no frame for `link_silence_timeout` | `AllOff` |
//! | alert pattern finished | `Silence` |
//!
//! Actuation errors are logged and counted; they never stop the receiver.
//! The change gate only remembers a distance once its haptic command has
//! been applied, so a failed actuation is retried on the next reading.

use std::time::Duration;

use drishti_hal::{ActuationCommand, ActuationRegistry, BuzzerPattern, HapticMapper};
use drishti_link::{Frame, LinkReceiver, Received, ReceiverStats};
use drishti_perception::ChangeGate;
use drishti_types::{ActuatorSet, Packet, Timestamp, flags};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// How often [`ReceiverNode::run`] checks for link silence.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Totals reported when [`ReceiverNode::run`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSummary {
    pub link: ReceiverStats,
    pub fall_alerts: u64,
    pub silences: u64,
    pub actuation_errors: u64,
}

pub struct ReceiverNode {
    link: LinkReceiver,
    mapper: HapticMapper,
    gate: ChangeGate,
    actuators: ActuationRegistry,
    silence_timeout: Duration,
    last_frame_at: Option<Timestamp>,
    last_node: Option<u8>,
    /// When the playing alert pattern runs out.
    alert_ends: Option<Timestamp>,
    silenced: bool,
    peer_low_battery: bool,
    peer_degraded: bool,
    fall_alerts: u64,
    silences: u64,
    actuation_errors: u64,
}

impl ReceiverNode {
    pub fn new(config: &NodeConfig, mapper: HapticMapper, actuators: ActuationRegistry) -> Self {
        Self {
            link: LinkReceiver::new(),
            mapper,
            gate: ChangeGate::new(config.change_threshold_cm),
            actuators,
            silence_timeout: config.link_silence_timeout(),
            last_frame_at: None,
            last_node: None,
            alert_ends: None,
            silenced: false,
            peer_low_battery: false,
            peer_degraded: false,
            fall_alerts: 0,
            silences: 0,
            actuation_errors: 0,
        }
    }

    pub fn actuators(&self) -> &ActuationRegistry {
        &self.actuators
    }

    pub fn stats(&self) -> ReceiverStats {
        self.link.stats()
    }

    pub fn summary(&self) -> ReceiverSummary {
        ReceiverSummary {
            link: self.link.stats(),
            fall_alerts: self.fall_alerts,
            silences: self.silences,
            actuation_errors: self.actuation_errors,
        }
    }

    /// Handle one raw frame received at `at`.
    pub fn on_frame(&mut self, bytes: &[u8], at: Timestamp) -> Received {
        let received = self.link.accept(bytes);
        if let Received::Accepted(packet) = &received {
            self.last_frame_at = Some(at);
            self.last_node = Some(packet.node_id);
            if self.silenced {
                info!(%at, node_id = packet.node_id, "link traffic resumed");
                self.silenced = false;
                self.alert(BuzzerPattern::Double, at);
            }
            self.actuate(packet, at);
        }
        received
    }

    /// Periodic check. Silences a finished alert, and switches everything
    /// off once the link has been quiet for longer than the silence timeout.
    pub fn on_idle(&mut self, now: Timestamp) {
        if self.alert_ends.is_some_and(|end| now >= end) {
            self.alert_ends = None;
            self.apply(ActuationCommand::Silence);
        }
        let Some(last) = self.last_frame_at else {
            return;
        };
        if self.silenced || now.since(last) <= self.silence_timeout {
            return;
        }
        warn!(silent_for = ?now.since(last), "no frames from node; switching actuators off");
        self.silenced = true;
        self.silences += 1;
        // A node that comes back has likely rebooted and restarted its sequence.
        if let Some(node_id) = self.last_node {
            self.link.forget(node_id);
        }
        self.gate.reset();
        self.alert_ends = None;
        self.apply(ActuationCommand::AllOff);
    }

    /// Consume frames until `shutdown` flips, the channel closes, or the
    /// shutdown sender is dropped. Every actuator is off on return.
    pub async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<Frame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReceiverSummary {
        let started = Instant::now();
        let now = || Timestamp::from_duration(started.elapsed());
        let mut idle = interval(IDLE_CHECK_INTERVAL);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

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

                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    self.on_frame(&frame, now());
                }

                _ = idle.tick() => self.on_idle(now()),
            }
        }

        self.apply(ActuationCommand::AllOff);
        let summary = self.summary();
        info!(
            accepted = summary.link.accepted,
            duplicates = summary.link.duplicates,
            dropped = summary.link.dropped,
            fall_alerts = summary.fall_alerts,
            "receiver stopped"
        );
        summary
    }

    fn actuate(&mut self, packet: &Packet, at: Timestamp) {
        let degraded = packet.has_flag(flags::SENSOR_DEGRADED);
        if degraded && !self.peer_degraded {
            warn!(node_id = packet.node_id, "node reports sensor degraded; switching actuators off");
            self.gate.reset();
            self.apply(ActuationCommand::AllOff);
        }
        self.peer_degraded = degraded;

        if packet.is_fall_alert() {
            self.fall_alerts += 1;
            warn!(
                node_id = packet.node_id,
                sequence = packet.sequence,
                severe = packet.has_flag(flags::FALL_SEVERE),
                "FALL ALERT"
            );
            self.alert(BuzzerPattern::Emergency, at);
        }

        let low = packet.has_flag(flags::LOW_BATTERY);
        if low && !self.peer_low_battery {
            info!(node_id = packet.node_id, pct = ?packet.battery_level(), "node battery low");
            self.alert(BuzzerPattern::LowBattery, at);
        }
        self.peer_low_battery = low;

        if degraded {
            return;
        }
        match packet.valid_distance() {
            Some(d) => {
                if self.gate.is_significant(d) {
                    let motors = self.mapper.motors_for(d);
                    debug!(distance_cm = d, motors = ?motors.ids(), "distance changed");
                    if self.apply(ActuationCommand::Haptics(motors)) {
                        self.gate.commit(d);
                    }
                }
            }
            None => {
                if self.gate.last().is_some()
                    && self.apply(ActuationCommand::Haptics(ActuatorSet::EMPTY))
                {
                    self.gate.reset();
                }
            }
        }
    }

    /// Start `pattern` and note when it runs out. A pattern suppressed by a
    /// higher-priority one leaves the running deadline alone.
    fn alert(&mut self, pattern: BuzzerPattern, at: Timestamp) {
        if self.apply(ActuationCommand::Alert(pattern))
            && self.actuators.playing() == Some(pattern)
        {
            self.alert_ends = Some(at.offset(pattern.duration()));
        }
    }

    /// Returns whether the command took effect.
    fn apply(&mut self, command: ActuationCommand) -> bool {
        match self.actuators.apply(command) {
            Ok(()) => true,
            Err(e) => {
                self.actuation_errors += 1;
                warn!(error = %e, ?command, "actuation failed");
                false
            }
        }
    }
}
