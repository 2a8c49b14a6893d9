//! `phoenix-middleware` – in-process, topic-keyed message transport.
//!
//! The bridge never talks to motor controllers directly: it publishes and
//! subscribes on named topics, and whatever sits on the other end of a topic
//! (a firmware gateway, the simulator or a test node) answers there.
//!
//! # Modules
//!
//! - [`bus`] – [`MessageBus`] topic registry, [`Node`] publisher/subscription
//!   factory, [`Publisher`] and [`Subscription`]. One Tokio broadcast channel
//!   backs each topic, so a slow subscriber drops stale messages instead of
//!   applying backpressure.
//! - [`executor`] – [`SingleThreadedExecutor`], which services every
//!   subscription of the nodes added to it on the calling thread until its
//!   [`CancelHandle`] fires, and [`SpinThread`], which runs one on a
//!   dedicated thread and joins it on stop.

pub mod bus;
pub mod executor;

pub use bus::{Message, MessageBus, Node, Publisher, Subscription, validate_topic_name};
pub use executor::{CancelHandle, SingleThreadedExecutor, SpinThread};
