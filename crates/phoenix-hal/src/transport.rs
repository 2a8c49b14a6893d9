//! [`TransportBridge`] – per-joint channels and the worker that services them.
//!
//! # Topics
//!
//! | Topic | Direction | Message | Depth |
//! |---|---|---|---|
//! | `<joint>/set` | outbound | [`MotorControl`] | 1 |
//! | `<joint>/status` | inbound | [`MotorStatus`] | 1 |
//!
//! Depth 1 on the inbound side means only the newest status matters: when
//! the worker falls behind, older unread statuses are dropped.
//!
//! # Lifecycle
//!
//! `Stopped` → [`activate`] → `Running` → [`deactivate`] → `Stopped`.
//! Channels and the worker thread exist only while running. `deactivate`
//! returns only after the worker thread has exited, so no inbound callback
//! can write into a [`StatusRecord`][crate::binding::StatusRecord] after it.
//!
//! [`activate`]: TransportBridge::activate
//! [`deactivate`]: TransportBridge::deactivate

use std::sync::Arc;

use phoenix_middleware::{MessageBus, Node, Publisher, SingleThreadedExecutor, SpinThread, Subscription};
use phoenix_types::{MotorControl, MotorStatus, TransportError};
use tracing::{debug, info, trace};

use crate::binding::BindingTable;

/// Queue depth of both per-joint topics.
pub const QUEUE_DEPTH: usize = 1;

/// Outbound command topic of `joint`.
pub fn command_topic(joint: &str) -> String {
    format!("{joint}/set")
}

/// Inbound status topic of `joint`.
pub fn status_topic(joint: &str) -> String {
    format!("{joint}/status")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Running,
}

/// Everything that exists only while the bridge is running.
struct Running {
    worker: SpinThread,
    publishers: Vec<Publisher<MotorControl>>,
    subscriptions: Vec<Subscription>,
    node: Node,
}

/// Owns the transport side of one bridge instance.
pub struct TransportBridge {
    bus: Arc<MessageBus>,
    running: Option<Running>,
}

impl TransportBridge {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus, running: None }
    }

    pub fn state(&self) -> TransportState {
        if self.running.is_some() {
            TransportState::Running
        } else {
            TransportState::Stopped
        }
    }

    /// Open one publisher and one subscription per joint of `table` on a
    /// node called `node_name`, then start the worker thread.
    ///
    /// Each subscription replaces the whole status record of its joint with
    /// every message it receives.
    ///
    /// # Errors
    ///
    /// [`TransportError::AlreadyRunning`] when called while running, or the
    /// first failure opening a channel or spawning the worker. On error
    /// nothing stays open.
    pub fn activate(&mut self, node_name: &str, table: &BindingTable) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let node = Node::new(node_name, Arc::clone(&self.bus));
        let mut publishers = Vec::with_capacity(table.len());
        let mut subscriptions = Vec::with_capacity(table.len());

        for (joint, _, status) in table.iter() {
            publishers.push(node.create_publisher::<MotorControl>(&command_topic(&joint.name), QUEUE_DEPTH)?);

            let status = Arc::clone(status);
            subscriptions.push(node.create_subscription::<MotorStatus, _>(
                &status_topic(&joint.name),
                QUEUE_DEPTH,
                move |msg| status.replace(&msg),
            )?);
            debug!(node = node_name, joint = %joint.name, "joint channels opened");
        }

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let worker = SpinThread::spawn(executor, &format!("{node_name}-spin"))?;

        info!(node = node_name, joints = table.len(), "transport running");
        self.running = Some(Running {
            worker,
            publishers,
            subscriptions,
            node,
        });
        Ok(())
    }

    /// Publish `msg` on the command topic of the joint at `index`.
    ///
    /// Fire-and-forget: returns how many subscribers received it, 0 when
    /// stopped or when nobody listens.
    pub fn publish(&self, index: usize, msg: MotorControl) -> usize {
        let Some(publisher) = self.running.as_ref().and_then(|r| r.publishers.get(index)) else {
            return 0;
        };
        let delivered = publisher.publish(msg);
        trace!(topic = publisher.topic(), value = msg.value, delivered, "command published");
        delivered
    }

    /// Stop the worker, wait for it to exit, then close every channel.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotRunning`] when already stopped, or
    /// [`TransportError::Worker`] when the worker ended abnormally. The
    /// channels are closed and the state is `Stopped` in both cases.
    pub fn deactivate(&mut self) -> Result<(), TransportError> {
        let running = self.running.take().ok_or(TransportError::NotRunning)?;
        let Running {
            worker,
            publishers,
            subscriptions,
            node,
        } = running;

        let joined = worker.stop();

        drop(publishers);
        drop(subscriptions);
        info!(node = %node.name(), "transport stopped");
        drop(node);
        joined
    }
}

impl Drop for TransportBridge {
    fn drop(&mut self) {
        if self.running.is_some() {
            // The worker must not outlive the records its callbacks write to.
            let _ = self.deactivate();
        }
    }
}
