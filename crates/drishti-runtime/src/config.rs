//! Node configuration – reads `~/.drishti/config.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working 5 Hz node. Calibration values measured by external tooling are
//! injected through the `[calibration]` table; the node never derives them
//! itself.
//!
//! ```toml
//! node_id = 2
//! sample_interval_ms = 200
//!
//! [calibration]
//! distance_offset_cm = -1.5
//! observed_success_rate_pct = 64.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use drishti_kernel::FailSafePolicy;
use drishti_link::RetryPolicy;
use drishti_perception::{FallConfig, ImpactPolicy, SignalFilter};
use drishti_types::NodeError;
use serde::{Deserialize, Serialize};

/// Success rate below which the retry budget is raised.
pub const LOW_SUCCESS_RATE_PCT: f32 = 70.0;
pub const DEFAULT_LINK_ATTEMPTS: u8 = 3;
pub const CALIBRATED_LINK_ATTEMPTS: u8 = 5;

// ────────────────────────────────────────────────────────────────────────────
// Calibration
// ────────────────────────────────────────────────────────────────────────────

/// External calibration input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Added to every filtered distance before the validity gate.
    pub distance_offset_cm: f32,
    /// Delivery success rate measured by the calibration tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_success_rate_pct: Option<f32>,
    /// Explicit retry budget; wins over the success-rate rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts_override: Option<u8>,
}

impl Calibration {
    /// Transmissions per packet: the override if present, else 5 when the
    /// measured success rate is below 70 %, else 3.
    pub fn link_attempts(&self) -> u8 {
        if let Some(n) = self.max_attempts_override {
            return n;
        }
        match self.observed_success_rate_pct {
            Some(rate) if rate < LOW_SUCCESS_RATE_PCT => CALIBRATED_LINK_ATTEMPTS,
            _ => DEFAULT_LINK_ATTEMPTS,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

/// `[fall]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallSettings {
    pub low_g: f32,
    pub high_g: f32,
    pub max_fall_window_ms: u64,
    /// Wait for the wearer to lie still before confirming.
    pub require_settle: bool,
    pub settle_window_ms: u64,
    pub settle_samples: u8,
    pub settle_tolerance_g: f32,
}

impl Default for FallSettings {
    fn default() -> Self {
        let defaults = FallConfig::default();
        Self {
            low_g: defaults.low_g,
            high_g: defaults.high_g,
            max_fall_window_ms: duration_ms(defaults.max_fall_window),
            require_settle: false,
            settle_window_ms: 2_000,
            settle_samples: 3,
            settle_tolerance_g: 0.25,
        }
    }
}

/// `[link]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub failure_limit: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            attempt_timeout_ms: duration_ms(retry.attempt_timeout),
            retry_delay_ms: duration_ms(retry.retry_delay),
            failure_limit: FailSafePolicy::default().link_failure_limit,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NodeConfig
// ────────────────────────────────────────────────────────────────────────────

/// Persisted node configuration stored in `~/.drishti/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: u8,

    /// Sampling period; 200 ms is the 5 Hz floor.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_sensor_read_timeout_ms")]
    pub sensor_read_timeout_ms: u64,

    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,

    /// Raw readings kept for the median filter.
    #[serde(default = "default_filter_window")]
    pub filter_window: usize,

    #[serde(default = "default_min_window_len")]
    pub min_window_len: usize,

    #[serde(default = "default_change_threshold_cm")]
    pub change_threshold_cm: f32,

    #[serde(default = "default_low_battery_pct")]
    pub low_battery_pct: u8,

    /// While the battery is low, send routine telemetry every n-th tick.
    #[serde(default = "default_low_battery_tx_divisor")]
    pub low_battery_tx_divisor: u32,

    /// Receiver side: actuators off after this long without a frame.
    #[serde(default = "default_link_silence_timeout_ms")]
    pub link_silence_timeout_ms: u64,

    #[serde(default)]
    pub fall: FallSettings,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub calibration: Calibration,
}

/// Longest sampling period the node accepts (5 Hz).
pub const MAX_SAMPLE_INTERVAL_MS: u64 = 200;

fn default_node_id() -> u8 {
    1
}
fn default_sample_interval_ms() -> u64 {
    MAX_SAMPLE_INTERVAL_MS
}
fn default_sensor_read_timeout_ms() -> u64 {
    50
}
fn default_sensor_timeout_ms() -> u64 {
    duration_ms(FailSafePolicy::default().sensor_timeout)
}
fn default_filter_window() -> usize {
    drishti_perception::signal_filter::DEFAULT_WINDOW_LEN
}
fn default_min_window_len() -> usize {
    3
}
fn default_change_threshold_cm() -> f32 {
    drishti_perception::signal_filter::DEFAULT_CHANGE_THRESHOLD_CM
}
fn default_low_battery_pct() -> u8 {
    drishti_perception::battery::DEFAULT_LOW_BATTERY_PCT
}
fn default_low_battery_tx_divisor() -> u32 {
    5
}
fn default_link_silence_timeout_ms() -> u64 {
    10_000
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            sample_interval_ms: default_sample_interval_ms(),
            sensor_read_timeout_ms: default_sensor_read_timeout_ms(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            filter_window: default_filter_window(),
            min_window_len: default_min_window_len(),
            change_threshold_cm: default_change_threshold_cm(),
            low_battery_pct: default_low_battery_pct(),
            low_battery_tx_divisor: default_low_battery_tx_divisor(),
            link_silence_timeout_ms: default_link_silence_timeout_ms(),
            fall: FallSettings::default(),
            link: LinkSettings::default(),
            calibration: Calibration::default(),
        }
    }
}

impl NodeConfig {
    /// Reject values the node cannot run with.
    ///
    /// # Errors
    ///
    /// [`NodeError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), NodeError> {
        let fail = |msg: String| Err(NodeError::Config(msg));

        if self.sample_interval_ms == 0 {
            return fail("sample_interval_ms must be positive".into());
        }
        if self.sample_interval_ms > MAX_SAMPLE_INTERVAL_MS {
            return fail(format!(
                "sample_interval_ms must be at most {MAX_SAMPLE_INTERVAL_MS} (5 Hz), got {}",
                self.sample_interval_ms
            ));
        }
        if self.sensor_read_timeout_ms == 0 {
            return fail("sensor_read_timeout_ms must be positive".into());
        }
        if self.filter_window == 0 {
            return fail("filter_window must hold at least one reading".into());
        }
        if self.min_window_len == 0 || self.min_window_len > self.filter_window {
            return fail(format!(
                "min_window_len {} must be within 1..={}",
                self.min_window_len, self.filter_window
            ));
        }
        if !(self.change_threshold_cm.is_finite() && self.change_threshold_cm >= 0.0) {
            return fail("change_threshold_cm must be a non-negative number".into());
        }
        if self.low_battery_tx_divisor == 0 {
            return fail("low_battery_tx_divisor must be at least 1".into());
        }
        if self.low_battery_pct > 100 {
            return fail(format!("low_battery_pct {} exceeds 100", self.low_battery_pct));
        }
        let fall = &self.fall;
        if !(fall.low_g.is_finite() && fall.high_g.is_finite() && fall.low_g > 0.0) {
            return fail("fall thresholds must be positive numbers".into());
        }
        if fall.low_g >= fall.high_g {
            return fail(format!(
                "fall.low_g ({}) must be below fall.high_g ({})",
                fall.low_g, fall.high_g
            ));
        }
        if fall.max_fall_window_ms == 0 {
            return fail("fall.max_fall_window_ms must be positive".into());
        }
        if fall.require_settle && fall.settle_samples == 0 {
            return fail("fall.settle_samples must be at least 1".into());
        }
        if self.link.attempt_timeout_ms == 0 {
            return fail("link.attempt_timeout_ms must be positive".into());
        }
        if self.link.failure_limit == 0 {
            return fail("link.failure_limit must be at least 1".into());
        }
        let cal = &self.calibration;
        if !cal.distance_offset_cm.is_finite() {
            return fail("calibration.distance_offset_cm must be a number".into());
        }
        if let Some(rate) = cal.observed_success_rate_pct {
            if !(0.0..=100.0).contains(&rate) {
                return fail(format!(
                    "calibration.observed_success_rate_pct {rate} is not a percentage"
                ));
            }
        }
        if cal.max_attempts_override == Some(0) {
            return fail("calibration.max_attempts_override must be at least 1".into());
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn sensor_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_read_timeout_ms)
    }

    pub fn link_silence_timeout(&self) -> Duration {
        Duration::from_millis(self.link_silence_timeout_ms)
    }

    /// Median filter with the calibrated offset applied.
    pub fn signal_filter(&self) -> SignalFilter {
        SignalFilter::new(self.min_window_len).with_offset(self.calibration.distance_offset_cm)
    }

    pub fn fall_config(&self) -> FallConfig {
        let fall = &self.fall;
        let policy = if fall.require_settle {
            ImpactPolicy::RequireSettle {
                settle_window: Duration::from_millis(fall.settle_window_ms),
                settle_samples: fall.settle_samples,
                settle_tolerance_g: fall.settle_tolerance_g,
            }
        } else {
            ImpactPolicy::ImpactOnly
        };
        FallConfig {
            low_g: fall.low_g,
            high_g: fall.high_g,
            max_fall_window: Duration::from_millis(fall.max_fall_window_ms),
            policy,
        }
    }

    /// Retry policy with the calibrated attempt budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.calibration.link_attempts(),
            attempt_timeout: Duration::from_millis(self.link.attempt_timeout_ms),
            retry_delay: Duration::from_millis(self.link.retry_delay_ms),
        }
    }

    pub fn failsafe_policy(&self) -> FailSafePolicy {
        FailSafePolicy {
            sensor_timeout: Duration::from_millis(self.sensor_timeout_ms),
            link_failure_limit: self.link.failure_limit,
        }
    }

    /// Render as TOML, e.g. to seed a config file.
    ///
    /// # Errors
    ///
    /// [`NodeError::Config`] if serialisation fails.
    pub fn to_toml(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("failed to serialize config: {e}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

/// `$DRISHTI_CONFIG` if set, else `~/.drishti/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DRISHTI_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".drishti").join("config.toml")
}

/// Load the config from the default location. `Ok(None)` if there is no file.
pub fn load() -> Result<Option<NodeConfig>, NodeError> {
    load_from(&config_path())
}

/// Load, apply environment overrides, and validate.
///
/// # Errors
///
/// [`NodeError::Config`] when the file cannot be read or parsed, or when the
/// resulting values fail [`NodeConfig::validate`].
pub fn load_from(path: &Path) -> Result<Option<NodeConfig>, NodeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        NodeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: NodeConfig = toml::from_str(&raw)
        .map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `DRISHTI_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DRISHTI_NODE_ID` | `node_id` |
/// | `DRISHTI_DISTANCE_OFFSET_CM` | `calibration.distance_offset_cm` |
/// | `DRISHTI_LINK_ATTEMPTS` | `calibration.max_attempts_override` |
/// | `DRISHTI_SAMPLE_INTERVAL_MS` | `sample_interval_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut NodeConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut NodeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(id) = lookup("DRISHTI_NODE_ID").and_then(|v| v.parse().ok()) {
        cfg.node_id = id;
    }
    if let Some(offset) = lookup("DRISHTI_DISTANCE_OFFSET_CM").and_then(|v| v.parse().ok()) {
        cfg.calibration.distance_offset_cm = offset;
    }
    if let Some(n) = lookup("DRISHTI_LINK_ATTEMPTS").and_then(|v| v.parse().ok()) {
        cfg.calibration.max_attempts_override = Some(n);
    }
    if let Some(ms) = lookup("DRISHTI_SAMPLE_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        cfg.sample_interval_ms = ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = NodeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sample_interval(), Duration::from_millis(200));
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.failsafe_policy(), FailSafePolicy::default());
        assert_eq!(cfg.fall_config(), FallConfig::default());
    }

    #[test]
    fn link_attempts_follow_calibration() {
        let mut cal = Calibration::default();
        assert_eq!(cal.link_attempts(), 3);

        cal.observed_success_rate_pct = Some(69.9);
        assert_eq!(cal.link_attempts(), 5);

        cal.observed_success_rate_pct = Some(70.0);
        assert_eq!(cal.link_attempts(), 3);

        cal.max_attempts_override = Some(4);
        assert_eq!(cal.link_attempts(), 4);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert_eq!(load_from(&path).unwrap(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "node_id = 7\n\n[calibration]\ndistance_offset_cm = -1.5\nobserved_success_rate_pct = 64.0\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().expect("config present");
        assert_eq!(cfg.node_id, 7);
        assert_eq!(cfg.filter_window, 9);
        assert_eq!(cfg.calibration.distance_offset_cm, -1.5);
        assert_eq!(cfg.retry_policy().max_attempts, 5);
        assert_eq!(cfg.signal_filter().offset_cm(), -1.5);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "node_id = \"seven\"").unwrap();
        assert!(matches!(load_from(&path), Err(NodeError::Config(_))));
    }

    #[test]
    fn invalid_values_rejected_on_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fall]\nlow_g = 3.0\nhigh_g = 2.0\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("fall.low_g"), "{err}");
    }

    #[test]
    fn validate_catches_each_field() {
        let cases: Vec<fn(&mut NodeConfig)> = vec![
            |c| c.sample_interval_ms = 0,
            |c| c.sample_interval_ms = MAX_SAMPLE_INTERVAL_MS + 1,
            |c| c.filter_window = 0,
            |c| c.min_window_len = 10,
            |c| c.min_window_len = 0,
            |c| c.low_battery_tx_divisor = 0,
            |c| c.calibration.max_attempts_override = Some(0),
            |c| c.calibration.observed_success_rate_pct = Some(120.0),
            |c| c.calibration.distance_offset_cm = f32::NAN,
            |c| c.link.failure_limit = 0,
        ];
        for (i, mutate) in cases.into_iter().enumerate() {
            let mut cfg = NodeConfig::default();
            mutate(&mut cfg);
            assert!(cfg.validate().is_err(), "case {i} should be rejected");
        }
    }

    #[test]
    fn sampling_must_stay_at_or_above_five_hz() {
        let mut cfg = NodeConfig {
            sample_interval_ms: 200,
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_ok());

        cfg.sample_interval_ms = 201;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
        assert!(err.to_string().contains("sample_interval_ms"), "{err}");
    }

    #[test]
    fn slow_sampling_in_file_is_rejected_on_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "sample_interval_ms = 5000\n").unwrap();
        assert!(matches!(load_from(&path), Err(NodeError::Config(_))));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("DRISHTI_NODE_ID", "12"),
            ("DRISHTI_DISTANCE_OFFSET_CM", "2.5"),
            ("DRISHTI_LINK_ATTEMPTS", "four"),
            ("DRISHTI_SAMPLE_INTERVAL_MS", "100"),
        ]
        .into_iter()
        .collect();
        let mut cfg = NodeConfig::default();
        apply_overrides_from(&mut cfg, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.node_id, 12);
        assert_eq!(cfg.calibration.distance_offset_cm, 2.5);
        assert_eq!(cfg.calibration.max_attempts_override, None);
        assert_eq!(cfg.sample_interval_ms, 100);
    }

    #[test]
    fn settle_policy_from_config() {
        let mut cfg = NodeConfig::default();
        cfg.fall.require_settle = true;
        assert!(matches!(
            cfg.fall_config().policy,
            ImpactPolicy::RequireSettle { settle_samples: 3, .. }
        ));
    }

    #[test]
    fn toml_output_parses_back() {
        let mut cfg = NodeConfig::default();
        cfg.calibration.max_attempts_override = Some(4);
        let text = cfg.to_toml().unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, cfg);
    }
}
