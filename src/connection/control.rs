//! Administrative connect-now / disconnect-now operations.
//!
//! These sit outside the command path and are meant for operator surfaces
//! such as an admin endpoint or a control node in a flow.

use std::fmt;
use std::str::FromStr;

use crate::error::DobotError;

use super::state::ConnectionState;

/// An administrative action on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    /// Open the connection if it is not already open.
    Connect,
    /// Close the connection if it is open or opening.
    Disconnect,
    /// Report the connection state without changing it.
    Status,
}

impl FromStr for ControlAction {
    type Err = DobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "status" => Ok(Self::Status),
            _ => Err(DobotError::UnknownAction(s.to_owned())),
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Status => "status",
        })
    }
}

/// Outcome of an administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReport {
    /// Short message for the operator.
    pub message: &'static str,
    /// Whether the connection is established after the action was applied.
    ///
    /// A connect that was only initiated reports `false`.
    pub connected: bool,
}

/// Side effect the manager has to carry out for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlEffect {
    Connect,
    Disconnect,
    None,
}

/// Decide the report and effect of `action` given the current state.
pub(crate) fn plan(action: ControlAction, state: ConnectionState) -> (ControlReport, ControlEffect) {
    use ConnectionState::*;

    let (message, connected, effect) = match (action, state) {
        (ControlAction::Connect, Connected) => ("Already connected", true, ControlEffect::None),
        (ControlAction::Connect, Connecting) => ("Connection initiated", false, ControlEffect::None),
        (ControlAction::Connect, Disconnected) => {
            ("Connection initiated", false, ControlEffect::Connect)
        }
        (ControlAction::Disconnect, Disconnected) => {
            ("Already disconnected", false, ControlEffect::None)
        }
        (ControlAction::Disconnect, _) => ("Disconnected", false, ControlEffect::Disconnect),
        (ControlAction::Status, Connected) => ("Connected", true, ControlEffect::None),
        (ControlAction::Status, Connecting) => ("Connecting", false, ControlEffect::None),
        (ControlAction::Status, Disconnected) => ("Disconnected", false, ControlEffect::None),
    };

    (ControlReport { message, connected }, effect)
}
