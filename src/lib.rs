//! Shared TCP command connection to Dobot robot controllers, built on tokio.
//!
//! Dobot controllers accept one text command at a time on their dashboard
//! port and answer each with a line of text. This crate owns that socket on
//! behalf of any number of consumers (flow nodes, pollers, operator tools)
//! and makes sure they can share it safely.
//!
//! # Features
//!
//! - One connection manager per controller, shared through a registry
//! - Strict FIFO command queue with a single command in flight
//! - Reply futures or callbacks, resolved exactly once
//! - Consumer reference counting with optional auto-connect
//! - Status broadcast to subscribed listeners
//! - Optional per-command deadline
//! - Injectable coordinate preset store
//!
//! # Example
//!
//! ```no_run
//! use dobot_link::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(ConnectionConfig::default());
//!
//!     manager.connect();
//!     manager.wait_for_state(ConnectionState::Connected).await?;
//!
//!     let reply = manager.send_command("EnableRobot()").await?;
//!     println!("Reply: {reply}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Overview
//!
//! ```text
//! client                          controller (port 29999)
//!   | --- "EnableRobot()\n" ----------> |
//!   | <-- "0,{},EnableRobot();" ------- |
//!   | --- "GetPose()\n" --------------> |
//!   | <-- "0,{250,0,50,0,0,0},GetPose();"
//! ```
//!
//! Replies are not framed; each read from the socket is taken as the reply
//! to the command in flight.

pub mod codec;
pub mod connection;
pub mod error;
pub mod presets;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionRegistry, ConnectionState,
    ControlAction, ControlReport, StatusUpdate,
};
pub use error::{DobotError, Result};
pub use presets::{Preset, PresetKind, PresetStore};
pub use types::{ConsumerId, DEFAULT_HOST, DEFAULT_PORT, Target};
