//! Bridge configuration – reads a TOML file describing the loop and the hardware.
//!
//! ```toml
//! update_rate_hz = 100.0
//! simulate = true
//!
//! [hardware]
//! name = "diffbot"
//!
//! [[hardware.joints]]
//! name = "left_wheel_joint"
//! command_interfaces = ["velocity"]
//! state_interfaces = ["velocity", "position"]
//!
//! [setpoints]
//! left_wheel_joint = 1.5
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use phoenix_types::HardwareInfo;
use serde::{Deserialize, Serialize};

/// Parsed contents of the bridge configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Control loop frequency in Hz.
    #[serde(default = "default_update_rate_hz")]
    pub update_rate_hz: f64,

    /// Start the in-process simulated motor controllers alongside the bridge.
    #[serde(default = "default_simulate")]
    pub simulate: bool,

    /// Speed reached by a simulated motor at full output.
    #[serde(default = "default_sim_max_velocity")]
    pub sim_max_velocity: f64,

    pub hardware: HardwareInfo,

    /// Command value per joint, applied once before activation.
    #[serde(default)]
    pub setpoints: BTreeMap<String, f64>,
}

fn default_update_rate_hz() -> f64 {
    100.0
}
fn default_simulate() -> bool {
    true
}
fn default_sim_max_velocity() -> f64 {
    2.0
}

impl Config {
    /// Control loop period derived from `update_rate_hz`.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate_hz)
    }

    /// Checks the hardware description alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !self.update_rate_hz.is_finite() || self.update_rate_hz <= 0.0 {
            return Err(format!(
                "update_rate_hz must be a positive number, got {}",
                self.update_rate_hz
            ));
        }
        if !self.sim_max_velocity.is_finite() || self.sim_max_velocity < 0.0 {
            return Err(format!(
                "sim_max_velocity must be a non-negative number, got {}",
                self.sim_max_velocity
            ));
        }
        for joint in self.setpoints.keys() {
            if !self.hardware.joints.iter().any(|j| &j.name == joint) {
                return Err(format!("setpoint for undeclared joint '{joint}'"));
            }
        }
        Ok(())
    }
}

/// Load the config at `path` and apply environment overrides.
pub fn load(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config at `path` as written, without overrides.
pub(crate) fn load_from(path: &Path) -> Result<Config, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `PHOENIX_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PHOENIX_UPDATE_RATE_HZ` | `update_rate_hz` |
/// | `PHOENIX_SIMULATE` | `simulate` (`true`/`false`/`1`/`0`) |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PHOENIX_UPDATE_RATE_HZ")
        && let Ok(rate) = v.parse::<f64>()
        && rate > 0.0
    {
        cfg.update_rate_hz = rate;
    }
    if let Ok(v) = std::env::var("PHOENIX_SIMULATE")
        && let Some(simulate) = parse_flag(&v)
    {
        cfg.simulate = simulate;
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
