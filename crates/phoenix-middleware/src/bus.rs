//! Topic-keyed publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood, one per topic, so
//! every subscriber receives every message without any single subscriber
//! blocking the publisher or the others.
//!
//! # Topics
//!
//! A topic is a name plus a message type. The first publisher or subscription
//! that opens a topic fixes both its type and its queue depth; later openers
//! must ask for the same type and depth. A topic lives as long as at least
//! one of its publishers or subscriptions does; once the last one is dropped
//! the name is free again.
//!
//! # Queue depth
//!
//! Depth is the number of unread messages a subscriber may fall behind
//! before the oldest ones are dropped. A depth of 1 gives latest-wins
//! semantics: a subscription that wakes up late sees only the newest message.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use phoenix_types::TransportError;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, trace};

/// Anything that can travel over the bus.
pub trait Message: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Message for T {}

/// Boxed delivery loop of one subscription, driven by an executor.
pub(crate) type SubscriptionTask = Pin<Box<dyn Future<Output = ()> + Send>>;

struct TopicEntry {
    type_name: &'static str,
    depth: usize,
    sender: Box<dyn Any + Send + Sync>,
    receiver_count: Box<dyn Fn() -> usize + Send + Sync>,
    /// Held strongly by every publisher and subscription on the topic.
    lease: Weak<()>,
}

impl TopicEntry {
    fn is_live(&self) -> bool {
        self.lease.strong_count() > 0
    }
}

/// Registry of every topic opened in this process.
///
/// Share it behind an [`Arc`]; nodes hold a clone.
#[derive(Default)]
pub struct MessageBus {
    topics: Mutex<HashMap<String, TopicEntry>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all topics with at least one live publisher or
    /// subscription, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let Ok(topics) = self.topics.lock() else {
            return Vec::new();
        };
        let mut names: Vec<String> = topics
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live subscriptions on `topic`; 0 for unknown topics.
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| {
                topics
                    .get(topic)
                    .filter(|entry| entry.is_live())
                    .map(|entry| (entry.receiver_count)())
            })
            .unwrap_or(0)
    }

    /// Open (or join) the broadcast channel behind `topic`. The returned
    /// lease keeps the topic registered while the caller holds it.
    fn channel<T: Message>(
        &self,
        topic: &str,
        depth: usize,
    ) -> Result<(broadcast::Sender<T>, Arc<()>), TransportError> {
        validate_topic_name(topic)?;
        if depth == 0 {
            return Err(TransportError::InvalidDepth {
                topic: topic.to_string(),
            });
        }

        let mut topics = self.topics.lock().map_err(|_| TransportError::Poisoned)?;
        topics.retain(|_, entry| entry.is_live());

        if let Some(entry) = topics.get(topic)
            && let Some(lease) = entry.lease.upgrade()
        {
            let sender = entry
                .sender
                .downcast_ref::<broadcast::Sender<T>>()
                .cloned()
                .ok_or_else(|| TransportError::TypeMismatch {
                    topic: topic.to_string(),
                    existing: entry.type_name,
                    requested: type_name::<T>(),
                })?;
            if entry.depth != depth {
                return Err(TransportError::DepthMismatch {
                    topic: topic.to_string(),
                    existing: entry.depth,
                    requested: depth,
                });
            }
            return Ok((sender, lease));
        }

        let (sender, _) = broadcast::channel::<T>(depth);
        let counter = sender.clone();
        let lease = Arc::new(());
        topics.insert(
            topic.to_string(),
            TopicEntry {
                type_name: type_name::<T>(),
                depth,
                sender: Box::new(sender.clone()),
                receiver_count: Box::new(move || counter.receiver_count()),
                lease: Arc::downgrade(&lease),
            },
        );
        debug!(topic, depth, message = type_name::<T>(), "topic opened");
        Ok((sender, lease))
    }
}

/// Check `topic` against the naming rules of the bus.
///
/// A valid name is non-empty, does not start with a digit, contains only
/// ASCII alphanumerics, `_`, `/`, or a leading `~`, and has no empty
/// segment (`//`) and no trailing `/`.
pub fn validate_topic_name(topic: &str) -> Result<(), TransportError> {
    let invalid = |reason: &str| TransportError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    if topic.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if topic.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("must not start with a digit"));
    }
    if topic.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if topic.contains("//") {
        return Err(invalid("must not contain an empty segment"));
    }
    for (i, c) in topic.char_indices() {
        let ok = c.is_ascii_alphanumeric() || c == '_' || c == '/' || (c == '~' && i == 0);
        if !ok {
            return Err(invalid(&format!("character '{c}' is not allowed")));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Sending end of a topic. Cheap to clone.
#[derive(Clone)]
pub struct Publisher<T> {
    topic: String,
    sender: broadcast::Sender<T>,
    _lease: Arc<()>,
}

impl<T: Message> Publisher<T> {
    /// Publish `msg`, fire-and-forget.
    ///
    /// Returns the number of subscriptions that were handed the message.
    /// Zero subscribers is a normal condition, not an error.
    pub fn publish(&self, msg: T) -> usize {
        match self.sender.send(msg) {
            Ok(n) => n,
            Err(_) => {
                trace!(topic = %self.topic, "no subscribers");
                0
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of subscriptions currently attached to the topic.
    pub fn subscription_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of a topic.
///
/// Holding the value keeps the callback alive; dropping it stops delivery.
/// Messages are only delivered while an executor spins the owning [`Node`].
pub struct Subscription {
    topic: String,
    _alive: Arc<()>,
    _lease: Arc<()>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Subscription tasks waiting to be picked up by an executor.
#[derive(Default)]
pub(crate) struct PendingTasks {
    tasks: Mutex<Vec<SubscriptionTask>>,
    waker: Mutex<Option<Arc<Notify>>>,
}

impl PendingTasks {
    fn push(&self, task: SubscriptionTask) -> Result<(), TransportError> {
        self.tasks
            .lock()
            .map_err(|_| TransportError::Poisoned)?
            .push(task);
        if let Ok(waker) = self.waker.lock() {
            if let Some(waker) = waker.as_ref() {
                waker.notify_one();
            }
        }
        Ok(())
    }

    pub(crate) fn drain(&self) -> Vec<SubscriptionTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn attach(&self, waker: Arc<Notify>) {
        if let Ok(mut slot) = self.waker.lock() {
            *slot = Some(waker);
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A named participant on the bus that owns publishers and subscriptions.
pub struct Node {
    name: String,
    bus: Arc<MessageBus>,
    pending: Arc<PendingTasks>,
}

impl Node {
    pub fn new(name: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        Self {
            name: name.into(),
            bus,
            pending: Arc::new(PendingTasks::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a publisher on `topic`.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidTopic`], [`TransportError::InvalidDepth`],
    /// [`TransportError::TypeMismatch`] when the topic already carries a
    /// different message type, or [`TransportError::DepthMismatch`] when it
    /// was opened with a different queue depth.
    pub fn create_publisher<T: Message>(
        &self,
        topic: &str,
        depth: usize,
    ) -> Result<Publisher<T>, TransportError> {
        let (sender, lease) = self.bus.channel::<T>(topic, depth)?;
        debug!(node = %self.name, topic, "publisher created");
        Ok(Publisher {
            topic: topic.to_string(),
            sender,
            _lease: lease,
        })
    }

    /// Open a subscription on `topic` that invokes `callback` for each
    /// message, on the thread of the executor spinning this node.
    ///
    /// The subscription starts buffering immediately; messages published
    /// before the executor starts are kept up to `depth`.
    ///
    /// # Errors
    ///
    /// Same as [`Node::create_publisher`].
    pub fn create_subscription<T, F>(
        &self,
        topic: &str,
        depth: usize,
        callback: F,
    ) -> Result<Subscription, TransportError>
    where
        T: Message,
        F: FnMut(T) + Send + 'static,
    {
        let (sender, lease) = self.bus.channel::<T>(topic, depth)?;
        let receiver = sender.subscribe();
        let alive = Arc::new(());
        let task = delivery_loop(topic.to_string(), receiver, Arc::downgrade(&alive), callback);
        self.pending.push(Box::pin(task))?;
        debug!(node = %self.name, topic, "subscription created");
        Ok(Subscription {
            topic: topic.to_string(),
            _alive: alive,
            _lease: lease,
        })
    }

    pub(crate) fn pending(&self) -> Arc<PendingTasks> {
        Arc::clone(&self.pending)
    }
}

async fn delivery_loop<T, F>(
    topic: String,
    mut receiver: broadcast::Receiver<T>,
    alive: Weak<()>,
    mut callback: F,
) where
    T: Message,
    F: FnMut(T) + Send + 'static,
{
    loop {
        match receiver.recv().await {
            Ok(msg) => {
                if alive.strong_count() == 0 {
                    break;
                }
                callback(msg);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Stale messages were overwritten; the next recv yields the oldest kept one.
                trace!(topic = %topic, skipped = n, "subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    trace!(topic = %topic, "delivery loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    fn make_node() -> (Arc<MessageBus>, Node) {
        let bus = Arc::new(MessageBus::new());
        let node = Node::new("test_node", Arc::clone(&bus));
        (bus, node)
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let (_bus, node) = make_node();
        let publisher = node.create_publisher::<Ping>("ping", 1).unwrap();
        assert_eq!(publisher.publish(Ping(1)), 0);
    }

    #[test]
    fn publisher_and_subscription_share_topic() {
        let (bus, node) = make_node();
        let publisher = node.create_publisher::<Ping>("arm_j1/set", 1).unwrap();
        let _sub = node
            .create_subscription::<Ping, _>("arm_j1/set", 1, |_| {})
            .unwrap();
        assert_eq!(publisher.subscription_count(), 1);
        assert_eq!(bus.subscription_count("arm_j1/set"), 1);
        assert_eq!(publisher.publish(Ping(7)), 1);
        assert_eq!(bus.topic_names(), vec!["arm_j1/set".to_string()]);
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let (_bus, node) = make_node();
        let _first = node.create_publisher::<Ping>("shared", 1).unwrap();
        let err = node.create_publisher::<f64>("shared", 1).err().unwrap();
        assert!(matches!(err, TransportError::TypeMismatch { .. }));
        assert!(err.to_string().contains("shared"));
    }

    #[test]
    fn depth_mismatch_is_rejected() {
        let (_bus, node) = make_node();
        let _status = node.create_publisher::<Ping>("arm_j1/status", 16).unwrap();
        let err = node
            .create_subscription::<Ping, _>("arm_j1/status", 1, |_| {})
            .err()
            .unwrap();
        assert_eq!(
            err,
            TransportError::DepthMismatch {
                topic: "arm_j1/status".to_string(),
                existing: 16,
                requested: 1,
            }
        );
    }

    #[test]
    fn topic_is_released_with_its_last_user() {
        let (bus, node) = make_node();
        let publisher = node.create_publisher::<Ping>("arm_j1/set", 1).unwrap();
        let second = publisher.clone();
        let sub = node
            .create_subscription::<Ping, _>("arm_j1/set", 1, |_| {})
            .unwrap();

        drop(publisher);
        drop(sub);
        assert_eq!(bus.topic_names(), vec!["arm_j1/set".to_string()]);

        drop(second);
        assert!(bus.topic_names().is_empty());
        assert_eq!(bus.subscription_count("arm_j1/set"), 0);

        // The name is free again, for any type and depth.
        node.create_publisher::<f64>("arm_j1/set", 4).unwrap();
    }

    #[test]
    fn zero_depth_is_rejected() {
        let (_bus, node) = make_node();
        let err = node.create_publisher::<Ping>("ping", 0).err().unwrap();
        assert_eq!(
            err,
            TransportError::InvalidDepth {
                topic: "ping".to_string()
            }
        );
    }

    #[test]
    fn topic_name_rules() {
        assert!(validate_topic_name("left_wheel_joint/status").is_ok());
        assert!(validate_topic_name("~/private").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("1joint/set").is_err());
        assert!(validate_topic_name("joint/").is_err());
        assert!(validate_topic_name("a//b").is_err());
        assert!(validate_topic_name("my joint/set").is_err());
        assert!(validate_topic_name("a~b").is_err());
    }

    #[test]
    fn unknown_topic_has_no_subscriptions() {
        let bus = MessageBus::new();
        assert_eq!(bus.subscription_count("nothing"), 0);
    }

    /// Driving a delivery loop by hand shows that a depth-1 topic only
    /// delivers the newest message to a late subscriber.
    #[tokio::test]
    async fn depth_one_delivers_latest_only() {
        let (_bus, node) = make_node();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = node
            .create_subscription::<Ping, _>("status", 1, move |p| {
                sink.lock().unwrap().push(p.0);
            })
            .unwrap();
        let publisher = node.create_publisher::<Ping>("status", 1).unwrap();
        for i in 1..=3 {
            publisher.publish(Ping(i));
        }

        let mut tasks = node.pending().drain();
        assert_eq!(tasks.len(), 1);
        let handle = tokio::spawn(tasks.remove(0));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.abort();

        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
