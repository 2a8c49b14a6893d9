//! `phoenix-types` – shared vocabulary of the Phoenix hardware bridge.
//!
//! Everything that crosses a crate boundary lives here: the hardware
//! description handed to the bridge at initialisation, the two messages that
//! travel over the transport, the lifecycle state, and the error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Interfaces
// ────────────────────────────────────────────────────────────────────────────

/// The physical quantity a joint interface represents.
///
/// The discriminants match the `mode` codes understood by the motor
/// controllers, so a [`MotorControl`] can be forwarded without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum InterfaceKind {
    /// Raw duty cycle, -1.0 ..= 1.0.
    PercentOutput = 0,
    Position = 1,
    Velocity = 2,
    /// Any interface name that is not recognised.
    Invalid = -1,
}

impl InterfaceKind {
    /// Numeric mode code as carried in [`MotorControl::mode`] on the wire.
    pub fn code(self) -> i8 {
        self as i8
    }
}

/// Whether an interface is written by the control loop or read by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceRole {
    Command,
    State,
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceRole::Command => write!(f, "command"),
            InterfaceRole::State => write!(f, "state"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware description
// ────────────────────────────────────────────────────────────────────────────

/// One controllable degree of freedom as declared in the hardware description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    /// Unique joint name, e.g. `"left_wheel_joint"`. Also the topic prefix.
    pub name: String,
    /// Declared command interface names. A valid joint declares exactly one.
    #[serde(default)]
    pub command_interfaces: Vec<String>,
    /// Declared state interface names, in the order they should be exported.
    #[serde(default)]
    pub state_interfaces: Vec<String>,
}

impl JointInfo {
    /// Convenience constructor used by tests and programmatic setups.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        command_interfaces: impl IntoIterator<Item = S>,
        state_interfaces: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            command_interfaces: command_interfaces.into_iter().map(Into::into).collect(),
            state_interfaces: state_interfaces.into_iter().map(Into::into).collect(),
        }
    }
}

/// Parsed hardware description for one bridge instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// Name of the hardware component; used as the transport node name.
    pub name: String,
    #[serde(default)]
    pub joints: Vec<JointInfo>,
}

// ────────────────────────────────────────────────────────────────────────────
// Wire messages
// ────────────────────────────────────────────────────────────────────────────

/// Command published on `<joint>/set`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorControl {
    pub mode: InterfaceKind,
    pub value: f64,
}

/// Status received on `<joint>/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorStatus {
    pub output_percent: f64,
    pub position: f64,
    pub velocity: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Constructed, or initialisation failed, or cleaned up.
    #[default]
    Unconfigured,
    /// Binding table built; no transport resources exist.
    Inactive,
    /// Transport worker running; `write` reaches the peers.
    Active,
    /// Shut down for good.
    Finalized,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Unconfigured => "unconfigured",
            BridgeState::Inactive => "inactive",
            BridgeState::Active => "active",
            BridgeState::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReturn {
    Success,
    Error,
}

/// Outcome of a hot-path `read` / `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Ok,
    Error,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Rejections raised while building the joint binding table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("joint '{joint}' has {count} command interfaces, expected 1")]
    WrongCommandCount { joint: String, count: usize },

    #[error("joint '{joint}' has an invalid {role} interface: '{interface}'")]
    InvalidInterface {
        joint: String,
        interface: String,
        role: InterfaceRole,
    },

    #[error("invalid hardware info: {0}")]
    InvalidHardwareInfo(String),
}

/// Failures opening, running, or closing transport resources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("invalid topic name '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("topic '{topic}' carries {existing}, cannot open it for {requested}")]
    TypeMismatch {
        topic: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("queue depth for topic '{topic}' must be at least 1")]
    InvalidDepth { topic: String },

    #[error("topic '{topic}' has queue depth {existing}, cannot open it with depth {requested}")]
    DepthMismatch {
        topic: String,
        existing: usize,
        requested: usize,
    },

    #[error("failed to start transport worker: {0}")]
    Spawn(String),

    #[error("transport worker failed: {0}")]
    Worker(String),

    #[error("transport is already running")]
    AlreadyRunning,

    #[error("transport is not running")]
    NotRunning,

    #[error("message bus state poisoned")]
    Poisoned,
}

/// Top-level error of the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: BridgeState,
    },

    #[error("interface '{joint}/{interface}' outlived the bridge that owns it")]
    Detached { joint: String, interface: String },

    #[error("unknown joint '{0}'")]
    UnknownJoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_kind_codes_match_wire_modes() {
        assert_eq!(InterfaceKind::PercentOutput.code(), 0);
        assert_eq!(InterfaceKind::Position.code(), 1);
        assert_eq!(InterfaceKind::Velocity.code(), 2);
        assert_eq!(InterfaceKind::Invalid.code(), -1);
    }

    #[test]
    fn joint_info_deserialises_with_missing_state_interfaces() {
        let json = r#"{"name":"arm_j1","command_interfaces":["velocity"]}"#;
        let joint: JointInfo = serde_json::from_str(json).unwrap();
        assert_eq!(joint.name, "arm_j1");
        assert_eq!(joint.command_interfaces, vec!["velocity".to_string()]);
        assert!(joint.state_interfaces.is_empty());
    }

    #[test]
    fn motor_control_json_shape() {
        let cmd = MotorControl {
            mode: InterfaceKind::Velocity,
            value: 1.5,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"mode":"velocity","value":1.5}"#);
    }

    #[test]
    fn init_error_names_joint_and_interface() {
        let err = InitError::InvalidInterface {
            joint: "arm_j1".to_string(),
            interface: "torque".to_string(),
            role: InterfaceRole::State,
        };
        let msg = err.to_string();
        assert!(msg.contains("arm_j1"));
        assert!(msg.contains("torque"));
        assert!(msg.contains("state"));

        let err = InitError::WrongCommandCount {
            joint: "bad".to_string(),
            count: 2,
        };
        assert!(err.to_string().contains("'bad' has 2 command interfaces"));
    }

    #[test]
    fn bridge_error_wraps_transparently() {
        let err: BridgeError = TransportError::NotRunning.into();
        assert_eq!(err.to_string(), "transport is not running");

        let err = BridgeError::Lifecycle {
            operation: "activate",
            state: BridgeState::Unconfigured,
        };
        assert_eq!(err.to_string(), "cannot activate while unconfigured");
    }

    #[test]
    fn default_state_is_unconfigured() {
        assert_eq!(BridgeState::default(), BridgeState::Unconfigured);
        assert_eq!(MotorStatus::default().velocity, 0.0);
    }
}
