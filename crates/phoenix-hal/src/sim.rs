//! In-process stand-in for the motor controllers, for tests and dry runs
//! without physical hardware.
//!
//! [`SimMotorController`] plays the far side of the bridge: it subscribes to
//! every `<joint>/set` topic, feeds each command into a first-order
//! [`JointModel`], and answers with the model's state on `<joint>/status`.
//! It runs its own node on its own spin thread, exactly like a separate
//! controller process would.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use phoenix_hal::sim::SimMotorController;
//! use phoenix_middleware::MessageBus;
//!
//! let bus = Arc::new(MessageBus::new());
//! let sim = SimMotorController::spawn(Arc::clone(&bus), ["left_wheel_joint"], 2.0)
//!     .expect("sim must start");
//! assert_eq!(sim.command_count("left_wheel_joint"), Some(0));
//! sim.stop().expect("sim must stop cleanly");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use phoenix_middleware::{MessageBus, Node, SingleThreadedExecutor, SpinThread, Subscription};
use phoenix_types::{InterfaceKind, MotorControl, MotorStatus, TransportError};
use tracing::{debug, info, warn};

use crate::transport::{QUEUE_DEPTH, command_topic, status_topic};

// ────────────────────────────────────────────────────────────────────────────
// Joint model
// ────────────────────────────────────────────────────────────────────────────

/// First-order kinematic model of one motor.
///
/// Commands take effect instantly: percent output and velocity set the
/// speed (clamped to `±max_velocity`), position jumps the shaft to the
/// target and stops it. Between commands the position integrates the
/// current velocity.
#[derive(Debug, Clone)]
pub struct JointModel {
    max_velocity: f64,
    status: MotorStatus,
}

impl JointModel {
    pub fn new(max_velocity: f64) -> Self {
        Self {
            max_velocity: max_velocity.abs(),
            status: MotorStatus::default(),
        }
    }

    /// Advance the model by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        if dt > 0.0 {
            self.status.position += self.status.velocity * dt;
        }
    }

    /// Apply one command. Returns `false` for [`InterfaceKind::Invalid`],
    /// which leaves the model untouched.
    pub fn apply(&mut self, cmd: MotorControl) -> bool {
        match cmd.mode {
            InterfaceKind::PercentOutput => {
                let percent = cmd.value.clamp(-1.0, 1.0);
                self.status.output_percent = percent;
                self.status.velocity = percent * self.max_velocity;
            }
            InterfaceKind::Velocity => {
                let velocity = cmd.value.clamp(-self.max_velocity, self.max_velocity);
                self.status.velocity = velocity;
                self.status.output_percent = if self.max_velocity > 0.0 {
                    velocity / self.max_velocity
                } else {
                    0.0
                };
            }
            InterfaceKind::Position => {
                self.status.position = cmd.value;
                self.status.velocity = 0.0;
                self.status.output_percent = 0.0;
            }
            InterfaceKind::Invalid => return false,
        }
        true
    }

    pub fn status(&self) -> MotorStatus {
        self.status
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

struct SimJointState {
    model: JointModel,
    last_step: Instant,
    last_command: Option<MotorControl>,
}

struct SimJoint {
    name: String,
    state: Mutex<SimJointState>,
    commands: AtomicUsize,
}

impl SimJoint {
    fn lock(&self) -> MutexGuard<'_, SimJointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Simulated motor controllers for a set of joints.
pub struct SimMotorController {
    joints: Vec<Arc<SimJoint>>,
    worker: SpinThread,
    _subscriptions: Vec<Subscription>,
    _node: Node,
}

impl SimMotorController {
    /// Start a controller for every name in `joints` on a node called
    /// `phoenix_sim`.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] raised while opening the per-joint channels
    /// or spawning the spin thread.
    pub fn spawn<I, S>(bus: Arc<MessageBus>, joints: I, max_velocity: f64) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let node = Node::new("phoenix_sim", bus);
        let mut sim_joints = Vec::new();
        let mut subscriptions = Vec::new();

        for name in joints {
            let joint = Arc::new(SimJoint {
                name: name.into(),
                state: Mutex::new(SimJointState {
                    model: JointModel::new(max_velocity),
                    last_step: Instant::now(),
                    last_command: None,
                }),
                commands: AtomicUsize::new(0),
            });

            let status_pub = node.create_publisher::<MotorStatus>(&status_topic(&joint.name), QUEUE_DEPTH)?;
            let target = Arc::clone(&joint);
            subscriptions.push(node.create_subscription::<MotorControl, _>(
                &command_topic(&joint.name),
                QUEUE_DEPTH,
                move |cmd| {
                    target.commands.fetch_add(1, Ordering::Relaxed);
                    let status = {
                        let mut state = target.lock();
                        let now = Instant::now();
                        let dt = now.duration_since(state.last_step).as_secs_f64();
                        state.last_step = now;
                        state.model.step(dt);
                        if !state.model.apply(cmd) {
                            warn!(joint = %target.name, "sim ignored command with invalid mode");
                        }
                        state.last_command = Some(cmd);
                        state.model.status()
                    };
                    status_pub.publish(status);
                },
            )?);
            debug!(joint = %joint.name, "sim joint ready");
            sim_joints.push(joint);
        }

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let worker = SpinThread::spawn(executor, "phoenix_sim-spin")?;
        info!(joints = sim_joints.len(), max_velocity, "simulated motor controllers running");

        Ok(Self {
            joints: sim_joints,
            worker,
            _subscriptions: subscriptions,
            _node: node,
        })
    }

    fn joint(&self, name: &str) -> Option<&SimJoint> {
        self.joints.iter().find(|j| j.name == name).map(Arc::as_ref)
    }

    /// Number of commands received for `joint`, `None` for an unknown joint.
    pub fn command_count(&self, joint: &str) -> Option<usize> {
        self.joint(joint).map(|j| j.commands.load(Ordering::Relaxed))
    }

    pub fn last_command(&self, joint: &str) -> Option<MotorControl> {
        self.joint(joint).and_then(|j| j.lock().last_command)
    }

    /// Current model state of `joint`.
    pub fn model_status(&self, joint: &str) -> Option<MotorStatus> {
        self.joint(joint).map(|j| j.lock().model.status())
    }

    /// Stop the spin thread and wait for it.
    pub fn stop(self) -> Result<(), TransportError> {
        self.worker.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn velocity_command_integrates_position() {
        let mut model = JointModel::new(2.0);
        assert!(model.apply(MotorControl {
            mode: InterfaceKind::Velocity,
            value: 1.5
        }));
        model.step(2.0);
        let status = model.status();
        assert_eq!(status.velocity, 1.5);
        assert_eq!(status.position, 3.0);
        assert_eq!(status.output_percent, 0.75);
    }

    #[test]
    fn percent_output_scales_and_clamps() {
        let mut model = JointModel::new(4.0);
        model.apply(MotorControl {
            mode: InterfaceKind::PercentOutput,
            value: 0.5,
        });
        assert_eq!(model.status().velocity, 2.0);

        model.apply(MotorControl {
            mode: InterfaceKind::PercentOutput,
            value: 3.0,
        });
        assert_eq!(model.status().output_percent, 1.0);
        assert_eq!(model.status().velocity, 4.0);
    }

    #[test]
    fn position_command_jumps_and_stops() {
        let mut model = JointModel::new(1.0);
        model.apply(MotorControl {
            mode: InterfaceKind::Velocity,
            value: 1.0,
        });
        model.apply(MotorControl {
            mode: InterfaceKind::Position,
            value: -0.25,
        });
        model.step(10.0);
        assert_eq!(model.status().position, -0.25);
        assert_eq!(model.status().velocity, 0.0);
    }

    #[test]
    fn invalid_mode_is_ignored() {
        let mut model = JointModel::new(1.0);
        assert!(!model.apply(MotorControl {
            mode: InterfaceKind::Invalid,
            value: 9.0
        }));
        assert_eq!(model.status(), MotorStatus::default());
    }

    #[test]
    fn answers_commands_with_status() {
        let bus = Arc::new(MessageBus::new());
        let sim = SimMotorController::spawn(Arc::clone(&bus), ["j1"], 2.0).unwrap();

        let peer = Node::new("peer", Arc::clone(&bus));
        let set = peer.create_publisher::<MotorControl>("j1/set", 1).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _status = peer
            .create_subscription::<MotorStatus, _>("j1/status", 1, move |s| {
                *sink.lock().unwrap() = Some(s);
            })
            .unwrap();
        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&peer);
        let spin = SpinThread::spawn(executor, "peer-spin").unwrap();

        let cmd = MotorControl {
            mode: InterfaceKind::Velocity,
            value: 1.0,
        };
        assert!(wait_until(Duration::from_secs(2), || {
            set.publish(cmd);
            seen.lock().unwrap().is_some_and(|s| s.velocity == 1.0)
        }));
        assert_eq!(sim.last_command("j1"), Some(cmd));
        assert!(sim.command_count("j1").unwrap() >= 1);
        assert_eq!(sim.command_count("missing"), None);

        spin.stop().unwrap();
        sim.stop().unwrap();
    }
}
