//! [`BindingTable`] – per-joint command and status storage.
//!
//! The table owns one [`CommandRecord`] and one [`StatusRecord`] per joint,
//! in two sequences indexed exactly like the declared joint list.
//!
//! # Concurrency
//!
//! While the bridge is active a status record has one writer (the transport
//! worker replacing it on every inbound message) and one reader (the host
//! control loop). The record is a single [`ArcSwap`] of the whole
//! [`MotorStatus`]: the writer swaps in a new message, the reader loads the
//! current one, and neither ever waits on the other. A reader may see a
//! status one message stale, but every load yields fields from the same
//! message.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use phoenix_types::{InitError, InterfaceKind, InterfaceRole, JointInfo, MotorControl, MotorStatus};

use crate::catalog::{StatusField, classify};

/// An `f64` stored as its bit pattern in an [`AtomicU64`]; backs the
/// command value, which is a single scalar.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

/// The value the control loop wants sent to one joint.
///
/// `mode` is fixed when the table is built; only `value` changes afterwards.
#[derive(Debug)]
pub struct CommandRecord {
    mode: InterfaceKind,
    value: AtomicF64,
}

impl CommandRecord {
    fn new(mode: InterfaceKind) -> Self {
        Self {
            mode,
            value: AtomicF64::default(),
        }
    }

    pub fn mode(&self) -> InterfaceKind {
        self.mode
    }

    pub fn value(&self) -> f64 {
        self.value.load()
    }

    pub fn set_value(&self, value: f64) {
        self.value.store(value);
    }

    /// The message `write` publishes for this joint.
    pub fn to_message(&self) -> MotorControl {
        MotorControl {
            mode: self.mode,
            value: self.value(),
        }
    }
}

/// The values last received from one joint's motor controller.
pub struct StatusRecord {
    current: ArcSwap<MotorStatus>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(MotorStatus::default()),
        }
    }
}

impl fmt::Debug for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusRecord")
            .field("current", &self.snapshot())
            .finish()
    }
}

impl StatusRecord {
    /// Swap in `status` as a whole. Fields the peer left at their default
    /// are written too; there is no per-field merge.
    pub fn replace(&self, status: &MotorStatus) {
        self.current.store(Arc::new(*status));
    }

    pub fn get(&self, field: StatusField) -> f64 {
        let status = self.current.load();
        match field {
            StatusField::OutputPercent => status.output_percent,
            StatusField::Position => status.position,
            StatusField::Velocity => status.velocity,
        }
    }

    /// Copy of the last status, all fields from the same message.
    pub fn snapshot(&self) -> MotorStatus {
        **self.current.load()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Table
// ────────────────────────────────────────────────────────────────────────────

/// Command and status storage for every declared joint.
#[derive(Debug)]
pub struct BindingTable {
    joints: Vec<JointInfo>,
    commands: Vec<Arc<CommandRecord>>,
    statuses: Vec<Arc<StatusRecord>>,
}

impl BindingTable {
    /// Validate `joints` and allocate their records, in declared order.
    ///
    /// Each joint must declare exactly one command interface, and every
    /// declared interface must be recognised by [`classify`]. The build is
    /// all-or-nothing: the first rejection aborts it and nothing is kept.
    ///
    /// # Errors
    ///
    /// [`InitError::WrongCommandCount`] or [`InitError::InvalidInterface`],
    /// naming the joint and the offending interface.
    pub fn build(joints: &[JointInfo]) -> Result<Self, InitError> {
        let mut commands = Vec::with_capacity(joints.len());
        let mut statuses = Vec::with_capacity(joints.len());

        for joint in joints {
            let [command_interface] = joint.command_interfaces.as_slice() else {
                return Err(InitError::WrongCommandCount {
                    joint: joint.name.clone(),
                    count: joint.command_interfaces.len(),
                });
            };

            let mode = classify(command_interface);
            if mode == InterfaceKind::Invalid {
                return Err(InitError::InvalidInterface {
                    joint: joint.name.clone(),
                    interface: command_interface.clone(),
                    role: InterfaceRole::Command,
                });
            }

            if let Some(bad) = joint
                .state_interfaces
                .iter()
                .find(|name| classify(name) == InterfaceKind::Invalid)
            {
                return Err(InitError::InvalidInterface {
                    joint: joint.name.clone(),
                    interface: bad.clone(),
                    role: InterfaceRole::State,
                });
            }

            commands.push(Arc::new(CommandRecord::new(mode)));
            statuses.push(Arc::new(StatusRecord::default()));
        }

        Ok(Self {
            joints: joints.to_vec(),
            commands,
            statuses,
        })
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn joints(&self) -> &[JointInfo] {
        &self.joints
    }

    /// Position of `joint` in the declared order.
    pub fn index_of(&self, joint: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == joint)
    }

    pub fn command(&self, index: usize) -> Option<&Arc<CommandRecord>> {
        self.commands.get(index)
    }

    pub fn status(&self, index: usize) -> Option<&Arc<StatusRecord>> {
        self.statuses.get(index)
    }

    /// Iterate `(joint, command, status)` in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&JointInfo, &Arc<CommandRecord>, &Arc<StatusRecord>)> {
        self.joints
            .iter()
            .zip(self.commands.iter())
            .zip(self.statuses.iter())
            .map(|((joint, command), status)| (joint, command, status))
    }
}
