//! Tokio TCP transport to the controller.
//!
//! The transport owns one socket split into halves: the write half stays with
//! the connection manager, the read half is drained by a spawned pump task
//! that forwards every read as a [`TransportEvent`].

pub mod tcp;

pub use tcp::{ControllerConnection, TransportEvent, TransportEventKind, spawn_connect};
