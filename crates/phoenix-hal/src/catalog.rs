//! Interface catalog: the only place interface names are interpreted.
//!
//! Both build-time validation in [`binding`][crate::binding] and the
//! exporter in [`export`][crate::export] go through [`classify`], so a name
//! can never be accepted by one and rejected by the other.

use phoenix_types::InterfaceKind;

pub const PERCENT_OUTPUT: &str = "percent_output";
pub const POSITION: &str = "position";
pub const VELOCITY: &str = "velocity";

/// Map an interface name to its [`InterfaceKind`].
///
/// Exact, case-sensitive match; anything unrecognised is
/// [`InterfaceKind::Invalid`].
pub fn classify(name: &str) -> InterfaceKind {
    match name {
        PERCENT_OUTPUT => InterfaceKind::PercentOutput,
        POSITION => InterfaceKind::Position,
        VELOCITY => InterfaceKind::Velocity,
        _ => InterfaceKind::Invalid,
    }
}

/// Canonical interface name of `kind`, `None` for [`InterfaceKind::Invalid`].
pub fn interface_name(kind: InterfaceKind) -> Option<&'static str> {
    match kind {
        InterfaceKind::PercentOutput => Some(PERCENT_OUTPUT),
        InterfaceKind::Position => Some(POSITION),
        InterfaceKind::Velocity => Some(VELOCITY),
        InterfaceKind::Invalid => None,
    }
}

/// A field of a [`StatusRecord`][crate::binding::StatusRecord].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusField {
    OutputPercent,
    Position,
    Velocity,
}

impl StatusField {
    /// The status field a state interface of `kind` reads from.
    pub fn for_kind(kind: InterfaceKind) -> Option<Self> {
        match kind {
            InterfaceKind::PercentOutput => Some(StatusField::OutputPercent),
            InterfaceKind::Position => Some(StatusField::Position),
            InterfaceKind::Velocity => Some(StatusField::Velocity),
            InterfaceKind::Invalid => None,
        }
    }
}
