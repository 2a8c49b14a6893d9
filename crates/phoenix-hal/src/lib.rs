//! `phoenix-hal` – the hardware interface side of the Phoenix bridge.
//!
//! Maps a declared list of joints onto owned command/status storage, hands
//! the host control loop handles into that storage, and keeps the status
//! side fresh from a background transport worker.
//!
//! # Modules
//!
//! - [`catalog`] – [`classify`]: interface name → [`InterfaceKind`][phoenix_types::InterfaceKind].
//! - [`binding`] – [`BindingTable`]: one command record and one status
//!   record per joint, built and validated from a
//!   [`HardwareInfo`][phoenix_types::HardwareInfo].
//! - [`export`] – [`StateInterface`] / [`CommandInterface`]: capability
//!   handles the host loop reads and writes through.
//! - [`transport`] – [`TransportBridge`]: per-joint `<joint>/set` publishers,
//!   `<joint>/status` subscriptions, and the worker thread that services them.
//! - [`system`] – [`SystemInterface`] and its [`PhoenixBridge`]
//!   implementation: the lifecycle and read/write entry points.
//! - [`sim`] – [`SimMotorController`][sim::SimMotorController]: an
//!   in-process stand-in for the motor controllers, for tests and dry runs.

pub mod binding;
pub mod catalog;
pub mod export;
pub mod sim;
pub mod system;
pub mod transport;

pub use binding::{BindingTable, CommandRecord, StatusRecord};
pub use catalog::{StatusField, classify};
pub use export::{CommandInterface, StateInterface};
pub use system::{PhoenixBridge, SystemInterface};
pub use transport::{TransportBridge, TransportState};
