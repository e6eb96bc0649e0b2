//! Per-send telemetry records for external logging and calibration tools.
//!
//! Those tools only parse text lines or JSON objects; they make no decisions
//! of their own. [`TelemetryRecord::to_line`] renders the text form:
//!
//! ```text
//! Node 1 #42 Distance: 87cm Battery: 76% Temp: 24.3C Delivery success (1 attempt)
//! ```
//!
//! A field whose value is unknown is left out of the line, so every field
//! that is present parses as a number.

use chrono::{DateTime, Utc};
use drishti_link::SendReport;
use drishti_types::flags;
use serde::{Deserialize, Serialize};

/// Why a packet was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Telemetry,
    FallAlert,
    /// Health-only packet sent while no fresh sample is available.
    Status,
}

/// One completed send, as seen by the transmitting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub recorded_at: DateTime<Utc>,
    pub node_id: u8,
    pub sequence: u16,
    pub kind: PacketKind,
    /// `None` when the packet did not carry a valid distance.
    pub distance_cm: Option<u16>,
    /// `None` when the node had not measured its battery yet.
    pub battery_pct: Option<u8>,
    pub temperature_c: Option<f32>,
    pub flags: u8,
    pub delivered: bool,
    pub attempts: usize,
    pub elapsed_ms: u64,
}

impl TelemetryRecord {
    pub fn from_report(report: &SendReport, kind: PacketKind, temperature_c: Option<f32>) -> Self {
        let packet = &report.packet;
        Self {
            recorded_at: Utc::now(),
            node_id: packet.node_id,
            sequence: packet.sequence,
            kind,
            distance_cm: packet
                .has_flag(flags::DISTANCE_VALID)
                .then_some(packet.distance_cm),
            battery_pct: packet.battery_level(),
            temperature_c,
            flags: packet.flags,
            delivered: report.delivered(),
            attempts: report.attempts(),
            elapsed_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Single human-readable line. Unknown values are omitted.
    pub fn to_line(&self) -> String {
        let mut line = format!("Node {} #{}", self.node_id, self.sequence);
        if let Some(d) = self.distance_cm {
            line.push_str(&format!(" Distance: {d}cm"));
        }
        if let Some(pct) = self.battery_pct {
            line.push_str(&format!(" Battery: {pct}%"));
        }
        if let Some(t) = self.temperature_c {
            line.push_str(&format!(" Temp: {t:.1}C"));
        }
        let delivery = if self.delivered { "success" } else { "fail" };
        let plural = if self.attempts == 1 { "" } else { "s" };
        line.push_str(&format!(
            " Delivery {delivery} ({} attempt{plural})",
            self.attempts
        ));
        if self.kind == PacketKind::FallAlert {
            line.push_str(" FALL ALERT");
        }
        line
    }

    /// The record as one JSON object.
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
