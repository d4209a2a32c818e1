//! Error types for controller connection operations.

use crate::types::Target;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a Dobot controller.
#[derive(Error, Debug)]
pub enum DobotError {
    /// A command was submitted while the connection was not established.
    #[error("Not connected to Dobot")]
    NotConnected,

    /// Writing a command to the socket failed.
    #[error("Failed to write command: {0}")]
    TransportWrite(#[source] io::Error),

    /// The socket reported an error after it was established.
    #[error("Socket error: {0}")]
    Transport(#[source] io::Error),

    /// The controller closed the connection.
    #[error("Connection closed by controller")]
    TransportClosed,

    /// The command was abandoned because the connection went down.
    #[error("Connection lost before a reply arrived")]
    ConnectionLost,

    /// No reply arrived within the configured command deadline.
    #[error("No reply within {0:?}")]
    CommandTimeout(Duration),

    /// The connection manager task is no longer running.
    #[error("Connection manager has shut down")]
    ManagerClosed,

    /// I/O error outside of the command path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Coordinate preset data could not be parsed.
    #[error("Failed to parse coordinates JSON: {0}")]
    PresetData(#[from] serde_json::Error),

    /// An administrative action name was not recognised.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// No connection is configured for the requested controller.
    #[error("No connection configured for {0}")]
    UnknownTarget(Target),
}

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, DobotError>;

impl DobotError {
    /// Check if this error ended the connection rather than a single command.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::TransportClosed | Self::ConnectionLost
        )
    }

    /// Check if the caller can reasonably resubmit the command after
    /// reconnecting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotConnected | Self::ConnectionLost | Self::CommandTimeout(_) => true,
            Self::TransportWrite(e) | Self::Transport(e) | Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
