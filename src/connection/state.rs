//! Connection state management.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
}

impl ConnectionState {
    /// Check if the connection is usable.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        *self == ConnectionState::Connecting
    }

    /// Human readable label shown by status indicators.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A status signal as broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// The new state.
    pub state: ConnectionState,
    /// Label for the state.
    pub label: &'static str,
}

impl From<ConnectionState> for StatusUpdate {
    fn from(state: ConnectionState) -> Self {
        Self {
            state,
            label: state.label(),
        }
    }
}

impl Default for StatusUpdate {
    fn default() -> Self {
        ConnectionState::default().into()
    }
}

/// Connection statistics.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Number of transport open attempts.
    pub connect_attempts: u64,
    /// Number of successful connections.
    pub connect_count: u64,
    /// Number of failed open attempts and socket errors.
    pub failure_count: u64,
    /// Number of commands written.
    pub commands_sent: u64,
    /// Number of replies received.
    pub replies_received: u64,
    /// Number of commands that hit their deadline.
    pub commands_timed_out: u64,
    /// Number of commands resolved with a connection-lost error.
    pub commands_abandoned: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// Total bytes received.
    pub bytes_received: u64,
    /// Time of last successful connection.
    pub last_connected: Option<Instant>,
    /// Time of last disconnect.
    pub last_disconnected: Option<Instant>,
    /// Time of last error.
    pub last_error: Option<Instant>,
}

impl ConnectionStats {
    /// Record a transport open attempt.
    pub fn record_attempt(&mut self) {
        self.connect_attempts += 1;
    }

    /// Record a successful connection.
    pub fn record_connect(&mut self) {
        self.connect_count += 1;
        self.last_connected = Some(Instant::now());
    }

    /// Record a disconnection.
    pub fn record_disconnect(&mut self) {
        self.last_disconnected = Some(Instant::now());
    }

    /// Record a connection failure.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_error = Some(Instant::now());
    }

    /// Record a written command.
    pub fn record_send(&mut self, bytes: usize) {
        self.commands_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a received reply.
    pub fn record_receive(&mut self, bytes: usize) {
        self.replies_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Record a command that timed out.
    pub fn record_timeout(&mut self) {
        self.commands_timed_out += 1;
    }

    /// Record commands abandoned by a teardown.
    pub fn record_abandoned(&mut self, count: usize) {
        self.commands_abandoned += count as u64;
    }

    /// Get uptime of the current connection.
    pub fn uptime(&self) -> Option<Duration> {
        match (self.last_connected, self.last_disconnected) {
            (Some(up), Some(down)) if down >= up => None,
            (Some(up), _) => Some(up.elapsed()),
            _ => None,
        }
    }
}
