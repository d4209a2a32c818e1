//! Connection management for Dobot controllers.
//!
//! This module provides:
//! - A shared, reference-counted connection per controller
//! - A FIFO command queue with a single command in flight
//! - Status broadcast to subscribed listeners
//! - Administrative connect/disconnect control
//!
//! # Example
//!
//! ```no_run
//! use dobot_link::connection::{ConnectionConfig, ConnectionEvent, ConnectionRegistry};
//!
//! # async fn run() -> dobot_link::Result<()> {
//! let registry = ConnectionRegistry::new();
//! let manager = registry.get_or_create(
//!     ConnectionConfig::new("192.168.1.6", 29999).with_auto_connect(true),
//! );
//!
//! let mut events = manager.subscribe();
//! manager.register("status-node");
//!
//! while let Some(event) = events.recv().await {
//!     if event == ConnectionEvent::Connected {
//!         break;
//!     }
//! }
//!
//! // Queued behind each other, answered in order.
//! let pose = manager.send_command("GetPose()");
//! let angle = manager.send_command("GetAngle()");
//! println!("{} / {}", pose.await?, angle.await?);
//! # Ok(())
//! # }
//! ```

mod config;
mod consumers;
mod control;
mod events;
mod manager;
mod queue;
mod registry;
mod state;

pub use config::{ConnectionConfig, DEFAULT_READ_BUFFER_SIZE};
pub use control::{ControlAction, ControlReport};
pub use events::{ConnectionEvent, SubscriptionId};
pub use manager::{ConnectionManager, PendingReply, Subscription, WeakConnectionManager};
pub use queue::CommandCallback;
pub use registry::ConnectionRegistry;
pub use state::{ConnectionState, ConnectionStats, StatusUpdate};
