//! Interface export: handles the host control loop binds its slots to.
//!
//! A handle names a `(joint, interface)` pair and refers to one field of a
//! record in the [`BindingTable`]. It holds only a [`Weak`] reference: the
//! bridge keeps sole ownership of the storage, and a handle that outlives
//! its bridge reports [`BridgeError::Detached`] instead of touching freed
//! memory.

use std::sync::{Arc, Weak};

use phoenix_types::BridgeError;

use crate::binding::{BindingTable, CommandRecord, StatusRecord};
use crate::catalog::{StatusField, classify};

/// Read-only handle to one status field of one joint.
#[derive(Debug, Clone)]
pub struct StateInterface {
    joint_name: String,
    interface_name: String,
    field: StatusField,
    record: Weak<StatusRecord>,
}

impl StateInterface {
    pub fn joint_name(&self) -> &str {
        &self.joint_name
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// `"<joint>/<interface>"`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.joint_name, self.interface_name)
    }

    pub fn field(&self) -> StatusField {
        self.field
    }

    /// Latest value received from the motor controller.
    pub fn get(&self) -> Result<f64, BridgeError> {
        self.record
            .upgrade()
            .map(|record| record.get(self.field))
            .ok_or_else(|| BridgeError::Detached {
                joint: self.joint_name.clone(),
                interface: self.interface_name.clone(),
            })
    }
}

/// Read/write handle to one joint's command value.
#[derive(Debug, Clone)]
pub struct CommandInterface {
    joint_name: String,
    interface_name: String,
    record: Weak<CommandRecord>,
}

impl CommandInterface {
    pub fn joint_name(&self) -> &str {
        &self.joint_name
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.joint_name, self.interface_name)
    }

    pub fn get(&self) -> Result<f64, BridgeError> {
        self.record
            .upgrade()
            .map(|record| record.value())
            .ok_or_else(|| self.detached())
    }

    /// Set the value the next `write` publishes.
    pub fn set(&self, value: f64) -> Result<(), BridgeError> {
        let record = self.record.upgrade().ok_or_else(|| self.detached())?;
        record.set_value(value);
        Ok(())
    }

    fn detached(&self) -> BridgeError {
        BridgeError::Detached {
            joint: self.joint_name.clone(),
            interface: self.interface_name.clone(),
        }
    }
}

impl BindingTable {
    /// One [`StateInterface`] per declared state interface, joints in
    /// declared order and interfaces in declared order within each joint.
    pub fn export_state(&self) -> Vec<StateInterface> {
        let mut out = Vec::new();
        for (joint, _, status) in self.iter() {
            for name in &joint.state_interfaces {
                // Every name was classified during build.
                let Some(field) = StatusField::for_kind(classify(name)) else {
                    continue;
                };
                out.push(StateInterface {
                    joint_name: joint.name.clone(),
                    interface_name: name.clone(),
                    field,
                    record: Arc::downgrade(status),
                });
            }
        }
        out
    }

    /// Exactly one [`CommandInterface`] per joint, named after the joint's
    /// single declared command interface.
    pub fn export_command(&self) -> Vec<CommandInterface> {
        self.iter()
            .filter_map(|(joint, command, _)| {
                let name = joint.command_interfaces.first()?;
                Some(CommandInterface {
                    joint_name: joint.name.clone(),
                    interface_name: name.clone(),
                    record: Arc::downgrade(command),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_types::{JointInfo, MotorStatus};

    fn arm_table() -> BindingTable {
        BindingTable::build(&[JointInfo::new("arm_j1", ["velocity"], ["velocity", "position"])])
            .unwrap()
    }

    #[test]
    fn arm_j1_state_export_follows_declaration_order() {
        let table = arm_table();
        let state = table.export_state();

        let names: Vec<(&str, &str)> = state
            .iter()
            .map(|s| (s.joint_name(), s.interface_name()))
            .collect();
        assert_eq!(names, vec![("arm_j1", "velocity"), ("arm_j1", "position")]);
        assert_eq!(state[0].field(), StatusField::Velocity);
        assert_eq!(state[1].field(), StatusField::Position);

        let status = table.status(0).unwrap();
        assert_eq!(Weak::as_ptr(&state[0].record), Arc::as_ptr(status));
        assert_eq!(Weak::as_ptr(&state[1].record), Arc::as_ptr(status));
    }

    #[test]
    fn arm_j1_command_export_points_at_value() {
        let table = arm_table();
        let command = table.export_command();

        assert_eq!(command.len(), 1);
        assert_eq!(command[0].joint_name(), "arm_j1");
        assert_eq!(command[0].interface_name(), "velocity");
        assert_eq!(command[0].full_name(), "arm_j1/velocity");

        command[0].set(2.5).unwrap();
        assert_eq!(table.command(0).unwrap().value(), 2.5);
        assert_eq!(command[0].get().unwrap(), 2.5);
    }

    #[test]
    fn state_handles_read_their_own_field() {
        let table = BindingTable::build(&[JointInfo::new(
            "wheel",
            ["percent_output"],
            ["percent_output", "position", "velocity"],
        )])
        .unwrap();
        table.status(0).unwrap().replace(&MotorStatus {
            output_percent: 0.25,
            position: 10.0,
            velocity: -3.0,
        });

        let values: Vec<f64> = table
            .export_state()
            .iter()
            .map(|s| s.get().unwrap())
            .collect();
        assert_eq!(values, vec![0.25, 10.0, -3.0]);
    }

    #[test]
    fn undeclared_state_fields_are_not_exported() {
        let table = BindingTable::build(&[
            JointInfo::new("a", ["velocity"], Vec::<&str>::new()),
            JointInfo::new("b", ["position"], ["position"]),
        ])
        .unwrap();
        let state = table.export_state();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].full_name(), "b/position");
        assert_eq!(table.export_command().len(), 2);
    }

    #[test]
    fn handles_detach_when_table_is_dropped() {
        let table = arm_table();
        let state = table.export_state();
        let command = table.export_command();
        drop(table);

        assert!(matches!(state[0].get(), Err(BridgeError::Detached { .. })));
        let err = command[0].set(1.0).unwrap_err();
        assert_eq!(
            err,
            BridgeError::Detached {
                joint: "arm_j1".to_string(),
                interface: "velocity".to_string()
            }
        );
    }
}
