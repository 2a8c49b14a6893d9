//! [`SystemInterface`] – the entry points a host control loop drives – and
//! [`PhoenixBridge`], its implementation on top of the message bus.
//!
//! # Lifecycle
//!
//! ```text
//!   on_init        on_activate       on_deactivate
//! Unconfigured ──▶ Inactive ──▶ Active ──▶ Inactive
//!       ▲              │  on_cleanup
//!       └──────────────┘
//!
//!   on_shutdown: any state ──▶ Finalized
//! ```
//!
//! `read` is a no-op: status records are refreshed by the transport worker.
//! `write` publishes every joint's command record.
//!
//! Each lifecycle method has a `Result`-returning twin
//! ([`PhoenixBridge::initialize`], [`PhoenixBridge::activate`], …); the trait
//! methods log the error and collapse it into a [`CallbackReturn`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use phoenix_middleware::MessageBus;
use phoenix_types::{
    BridgeError, BridgeState, CallbackReturn, HardwareInfo, InitError, MotorControl, MotorStatus,
    ReturnType,
};
use tracing::{debug, error, info, trace};

use crate::binding::BindingTable;
use crate::export::{CommandInterface, StateInterface};
use crate::transport::{TransportBridge, TransportState};

/// Entry points of a hardware component as seen by the host control loop.
///
/// The host calls `on_init` once, binds its slots to the exported
/// interfaces, then alternates `read` and `write` at a fixed period while
/// the component is active.
pub trait SystemInterface {
    fn on_init(&mut self, info: &HardwareInfo) -> CallbackReturn;

    fn export_state_interfaces(&self) -> Vec<StateInterface>;

    fn export_command_interfaces(&self) -> Vec<CommandInterface>;

    fn on_activate(&mut self) -> CallbackReturn;

    fn on_deactivate(&mut self) -> CallbackReturn;

    /// Release everything `on_init` built.
    fn on_cleanup(&mut self) -> CallbackReturn {
        CallbackReturn::Success
    }

    /// Final transition; the component is unusable afterwards.
    fn on_shutdown(&mut self) -> CallbackReturn {
        CallbackReturn::Success
    }

    fn read(&mut self, time: Instant, period: Duration) -> ReturnType;

    fn write(&mut self, time: Instant, period: Duration) -> ReturnType;
}

/// Validation every component applies to its [`HardwareInfo`] before
/// interpreting the joints.
///
/// # Errors
///
/// [`InitError::InvalidHardwareInfo`] when the component name is empty, a
/// joint name is empty, or two joints share a name.
pub fn validate_hardware_info(info: &HardwareInfo) -> Result<(), InitError> {
    if info.name.trim().is_empty() {
        return Err(InitError::InvalidHardwareInfo(
            "hardware name must not be empty".to_string(),
        ));
    }
    for (i, joint) in info.joints.iter().enumerate() {
        if joint.name.trim().is_empty() {
            return Err(InitError::InvalidHardwareInfo(format!(
                "joint #{i} has an empty name"
            )));
        }
        if info.joints[..i].iter().any(|other| other.name == joint.name) {
            return Err(InitError::InvalidHardwareInfo(format!(
                "joint '{}' is declared more than once",
                joint.name
            )));
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// PhoenixBridge
// ────────────────────────────────────────────────────────────────────────────

/// Bridges a fixed-rate control loop to motor controllers reachable over a
/// [`MessageBus`].
pub struct PhoenixBridge {
    info: Option<HardwareInfo>,
    table: Option<BindingTable>,
    transport: TransportBridge,
    state: BridgeState,
}

impl PhoenixBridge {
    /// Create an unconfigured bridge that will open its channels on `bus`.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            info: None,
            table: None,
            transport: TransportBridge::new(bus),
            state: BridgeState::Unconfigured,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Hardware name from the last successful initialisation.
    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.name.as_str())
    }

    pub fn binding_table(&self) -> Option<&BindingTable> {
        self.table.as_ref()
    }

    fn lifecycle_error(&self, operation: &'static str) -> BridgeError {
        BridgeError::Lifecycle {
            operation,
            state: self.state,
        }
    }

    /// Validate `info` and build the binding table. `Unconfigured` → `Inactive`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Lifecycle`] outside `Unconfigured`, or the
    /// [`InitError`] that rejected the configuration. The bridge stays
    /// `Unconfigured` on error.
    pub fn initialize(&mut self, info: &HardwareInfo) -> Result<(), BridgeError> {
        if self.state != BridgeState::Unconfigured {
            return Err(self.lifecycle_error("initialize"));
        }
        validate_hardware_info(info)?;
        let table = BindingTable::build(&info.joints)?;

        info!(hardware = %info.name, joints = table.len(), "bridge initialised");
        self.info = Some(info.clone());
        self.table = Some(table);
        self.state = BridgeState::Inactive;
        Ok(())
    }

    /// Start the transport. `Inactive` → `Active`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Lifecycle`] outside `Inactive`, or the
    /// [`TransportError`][phoenix_types::TransportError] that stopped the
    /// transport from starting. A transport failure drops the binding table
    /// and leaves the bridge `Unconfigured`; the host must initialise again
    /// before retrying.
    pub fn activate(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Inactive {
            return Err(self.lifecycle_error("activate"));
        }
        let (Some(info), Some(table)) = (self.info.as_ref(), self.table.as_ref()) else {
            return Err(self.lifecycle_error("activate"));
        };

        if let Err(e) = self.transport.activate(&info.name, table) {
            self.table = None;
            self.info = None;
            self.state = BridgeState::Unconfigured;
            return Err(e.into());
        }
        self.state = BridgeState::Active;
        info!(hardware = %info.name, "bridge active");
        Ok(())
    }

    /// Stop the transport and wait for its worker. `Active` → `Inactive`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Lifecycle`] outside `Active`, or a worker failure
    /// reported while joining. The transport is stopped either way and the
    /// bridge is `Inactive`.
    pub fn deactivate(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Active {
            return Err(self.lifecycle_error("deactivate"));
        }
        let stopped = self.transport.deactivate();
        self.state = BridgeState::Inactive;
        stopped?;
        info!(hardware = self.name().unwrap_or_default(), "bridge inactive");
        Ok(())
    }

    /// Drop the binding table. `Inactive` → `Unconfigured`.
    ///
    /// Previously exported handles report [`BridgeError::Detached`] afterwards.
    pub fn cleanup(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Inactive {
            return Err(self.lifecycle_error("clean up"));
        }
        self.table = None;
        self.info = None;
        self.state = BridgeState::Unconfigured;
        Ok(())
    }

    /// Deactivate if needed, release everything, and enter `Finalized`.
    pub fn shutdown(&mut self) -> Result<(), BridgeError> {
        if self.state == BridgeState::Finalized {
            return Err(self.lifecycle_error("shut down"));
        }
        let stopped = if self.state == BridgeState::Active {
            self.deactivate()
        } else {
            Ok(())
        };
        self.table = None;
        self.info = None;
        self.state = BridgeState::Finalized;
        stopped
    }

    /// Publish the current command record of every joint. Returns the number
    /// of deliveries across all joints; 0 when the transport is stopped.
    pub fn publish_commands(&self) -> usize {
        let Some(table) = self.table.as_ref() else {
            return 0;
        };
        table
            .iter()
            .enumerate()
            .map(|(i, (_, command, _))| self.transport.publish(i, command.to_message()))
            .sum()
    }

    /// Last status received for `joint`.
    pub fn status(&self, joint: &str) -> Result<MotorStatus, BridgeError> {
        let (table, index) = self.lookup(joint)?;
        table
            .status(index)
            .map(|s| s.snapshot())
            .ok_or_else(|| BridgeError::UnknownJoint(joint.to_string()))
    }

    /// Command the next `write` will publish for `joint`.
    pub fn command(&self, joint: &str) -> Result<MotorControl, BridgeError> {
        let (table, index) = self.lookup(joint)?;
        table
            .command(index)
            .map(|c| c.to_message())
            .ok_or_else(|| BridgeError::UnknownJoint(joint.to_string()))
    }

    fn lookup(&self, joint: &str) -> Result<(&BindingTable, usize), BridgeError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| self.lifecycle_error("look up joints"))?;
        let index = table
            .index_of(joint)
            .ok_or_else(|| BridgeError::UnknownJoint(joint.to_string()))?;
        Ok((table, index))
    }

    fn report(&self, transition: &str, result: Result<(), BridgeError>) -> CallbackReturn {
        match result {
            Ok(()) => CallbackReturn::Success,
            Err(e) => {
                error!(transition, error = %e, state = %self.state, "lifecycle transition failed");
                CallbackReturn::Error
            }
        }
    }
}

impl SystemInterface for PhoenixBridge {
    fn on_init(&mut self, info: &HardwareInfo) -> CallbackReturn {
        let result = self.initialize(info);
        self.report("on_init", result)
    }

    fn export_state_interfaces(&self) -> Vec<StateInterface> {
        self.table
            .as_ref()
            .map(BindingTable::export_state)
            .unwrap_or_default()
    }

    fn export_command_interfaces(&self) -> Vec<CommandInterface> {
        self.table
            .as_ref()
            .map(BindingTable::export_command)
            .unwrap_or_default()
    }

    fn on_activate(&mut self) -> CallbackReturn {
        let result = self.activate();
        self.report("on_activate", result)
    }

    fn on_deactivate(&mut self) -> CallbackReturn {
        let result = self.deactivate();
        self.report("on_deactivate", result)
    }

    fn on_cleanup(&mut self) -> CallbackReturn {
        let result = self.cleanup();
        self.report("on_cleanup", result)
    }

    fn on_shutdown(&mut self) -> CallbackReturn {
        let result = self.shutdown();
        self.report("on_shutdown", result)
    }

    fn read(&mut self, _time: Instant, _period: Duration) -> ReturnType {
        // Status records are kept fresh by the transport worker.
        ReturnType::Ok
    }

    fn write(&mut self, _time: Instant, period: Duration) -> ReturnType {
        if self.transport.state() != TransportState::Running {
            debug!(state = %self.state, "write skipped, transport stopped");
            return ReturnType::Ok;
        }
        let delivered = self.publish_commands();
        trace!(delivered, ?period, "commands written");
        ReturnType::Ok
    }
}
