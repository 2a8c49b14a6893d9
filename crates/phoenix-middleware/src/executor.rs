//! [`SingleThreadedExecutor`] – drives subscription callbacks on one thread.
//!
//! Every subscription created on a node added to the executor becomes one
//! cooperative task on a current-thread Tokio runtime. [`spin`] blocks the
//! calling thread until the executor's [`CancelHandle`] fires; callbacks are
//! synchronous, so cancellation is only observed between two callbacks and
//! never in the middle of one.
//!
//! Subscriptions created while the executor is already spinning are picked
//! up on the fly.
//!
//! [`spin`]: SingleThreadedExecutor::spin

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use phoenix_types::TransportError;
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::bus::{Node, PendingTasks};

/// Cloneable handle that stops a spinning executor.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request the executor to stop. Cancelling before `spin` starts makes
    /// `spin` return immediately.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Executor that services all added nodes on the thread calling [`spin`].
///
/// [`spin`]: SingleThreadedExecutor::spin
pub struct SingleThreadedExecutor {
    sources: Vec<Arc<PendingTasks>>,
    wake: Arc<Notify>,
    cancel: CancelHandle,
}

impl Default for SingleThreadedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleThreadedExecutor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            sources: Vec::new(),
            wake: Arc::new(Notify::new()),
            cancel: CancelHandle { tx: Arc::new(tx) },
        }
    }

    /// Add `node` so its subscriptions are serviced by this executor.
    pub fn add_node(&mut self, node: &Node) {
        let pending = node.pending();
        pending.attach(Arc::clone(&self.wake));
        self.sources.push(pending);
        debug!(node = %node.name(), "node added to executor");
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run every subscription until cancelled.
    ///
    /// # Errors
    ///
    /// [`TransportError::Worker`] when the runtime cannot be built or when a
    /// subscription callback panicked while spinning. A panicking callback
    /// only ends its own subscription; the others keep running until cancel.
    pub fn spin(self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| TransportError::Worker(format!("runtime build failed: {e}")))?;

        let mut cancelled = self.cancel.tx.subscribe();
        let mut panicked: Option<String> = None;

        runtime.block_on(async {
            let mut tasks = JoinSet::new();
            loop {
                for source in &self.sources {
                    for task in source.drain() {
                        tasks.spawn(task);
                    }
                }
                if *cancelled.borrow_and_update() {
                    break;
                }

                tokio::select! {
                    changed = cancelled.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.wake.notified() => {}
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!("subscription callback panicked");
                                panicked.get_or_insert_with(|| "subscription callback panicked".to_string());
                            }
                        }
                    }
                }
            }
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        panicked.get_or_insert_with(|| "subscription callback panicked".to_string());
                    }
                }
            }
        });

        debug!("executor stopped");
        match panicked {
            Some(reason) => Err(TransportError::Worker(reason)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dedicated spin thread
// ---------------------------------------------------------------------------

/// An executor spinning on its own OS thread.
///
/// [`SpinThread::stop`] cancels the executor and blocks until the thread has
/// exited, so no callback of its nodes can run after `stop` returns. Dropping
/// a running `SpinThread` does the same.
pub struct SpinThread {
    name: String,
    cancel: CancelHandle,
    handle: Option<JoinHandle<Result<(), TransportError>>>,
}

impl SpinThread {
    /// Move `executor` onto a new thread called `name` and start spinning.
    ///
    /// # Errors
    ///
    /// [`TransportError::Spawn`] when the OS refuses to create the thread.
    pub fn spawn(executor: SingleThreadedExecutor, name: &str) -> Result<Self, TransportError> {
        let cancel = executor.cancel_handle();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || executor.spin())
            .map_err(|e| TransportError::Spawn(format!("thread '{name}': {e}")))?;
        debug!(thread = name, "spin thread started");
        Ok(Self {
            name: name.to_string(),
            cancel,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the executor and join the thread.
    ///
    /// # Errors
    ///
    /// [`TransportError::Worker`] when the executor reported a failure or the
    /// thread itself panicked.
    pub fn stop(mut self) -> Result<(), TransportError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), TransportError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.cancel.cancel();
        let outcome = handle
            .join()
            .map_err(|_| TransportError::Worker(format!("thread '{}' panicked", self.name)))?;
        debug!(thread = %self.name, "spin thread joined");
        outcome
    }
}

impl Drop for SpinThread {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!(thread = %self.name, error = %e, "spin thread stopped with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

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
    fn cancel_before_spin_returns_immediately() {
        let executor = SingleThreadedExecutor::new();
        let cancel = executor.cancel_handle();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert!(executor.spin().is_ok());
    }

    #[test]
    fn spin_delivers_until_cancelled() {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("listener", Arc::clone(&bus));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _sub = node
            .create_subscription::<u32, _>("counter", 16, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let publisher = node.create_publisher::<u32>("counter", 16).unwrap();

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let cancel = executor.cancel_handle();
        let worker = thread::spawn(move || executor.spin());

        for i in 0..5 {
            publisher.publish(i);
        }
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 5));

        cancel.cancel();
        assert!(worker.join().unwrap().is_ok());

        // Nothing is serviced any more once spin has returned.
        publisher.publish(99);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn subscription_created_while_spinning_is_serviced() {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("late", Arc::clone(&bus));
        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let cancel = executor.cancel_handle();
        let worker = thread::spawn(move || executor.spin());

        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        let _sub = node
            .create_subscription::<String, _>("greeting", 1, move |s| {
                *sink.lock().unwrap() = Some(s);
            })
            .unwrap();
        let publisher = node.create_publisher::<String>("greeting", 1).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            publisher.publish("hello".to_string());
            last.lock().unwrap().is_some()
        }));

        cancel.cancel();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("dropper", Arc::clone(&bus));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = node
            .create_subscription::<u8, _>("ticks", 4, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let publisher = node.create_publisher::<u8>("ticks", 4).unwrap();

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let cancel = executor.cancel_handle();
        let worker = thread::spawn(move || executor.spin());

        publisher.publish(1);
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));

        drop(sub);
        publisher.publish(2);
        publisher.publish(3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn spin_thread_stop_joins_worker() {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("threaded", Arc::clone(&bus));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _sub = node
            .create_subscription::<u8, _>("tick", 1, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let publisher = node.create_publisher::<u8>("tick", 1).unwrap();

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let spin = SpinThread::spawn(executor, "threaded-spin").unwrap();
        assert_eq!(spin.name(), "threaded-spin");

        assert!(wait_until(Duration::from_secs(2), || {
            publisher.publish(1);
            count.load(Ordering::SeqCst) > 0
        }));
        spin.stop().unwrap();

        let after_stop = count.load(Ordering::SeqCst);
        publisher.publish(2);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn panicking_callback_is_reported_on_cancel() {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("faulty", Arc::clone(&bus));
        let _sub = node
            .create_subscription::<u8, _>("boom", 1, |_| panic!("callback failure"))
            .unwrap();
        let publisher = node.create_publisher::<u8>("boom", 1).unwrap();

        let mut executor = SingleThreadedExecutor::new();
        executor.add_node(&node);
        let cancel = executor.cancel_handle();
        let worker = thread::spawn(move || executor.spin());

        publisher.publish(1);
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(TransportError::Worker(_))));
    }
}
