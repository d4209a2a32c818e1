//! One shared manager per controller endpoint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::{DobotError, Result};
use crate::types::Target;

use super::config::ConnectionConfig;
use super::control::{ControlAction, ControlReport};
use super::manager::ConnectionManager;

/// Table of connection managers keyed by controller endpoint.
///
/// Owned by whoever hosts the consumers; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    managers: Mutex<HashMap<Target, ConnectionManager>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the manager for the configured target, creating it if needed.
    ///
    /// When a manager already exists its original configuration is kept.
    pub fn get_or_create(&self, config: ConnectionConfig) -> ConnectionManager {
        let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        let target = config.target();

        if let Some(existing) = managers.get(&target) {
            if existing.config() != &config {
                debug!(controller = %target, "reusing existing manager, new configuration ignored");
            }
            return existing.clone();
        }

        debug!(controller = %target, "creating connection manager");
        let manager = ConnectionManager::new(config);
        managers.insert(target, manager.clone());
        manager
    }

    /// Get the manager for a target.
    pub fn get(&self, target: &Target) -> Option<ConnectionManager> {
        let managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        managers.get(target).cloned()
    }

    /// Remove the manager for a target.
    ///
    /// Its connection closes once every other handle to it is dropped.
    pub fn remove(&self, target: &Target) -> Option<ConnectionManager> {
        let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        managers.remove(target)
    }

    /// Apply an administrative action to the manager for a target.
    pub async fn control(&self, target: &Target, action: ControlAction) -> Result<ControlReport> {
        let manager = self
            .get(target)
            .ok_or_else(|| DobotError::UnknownTarget(target.clone()))?;
        manager.control(action).await
    }

    /// List the registered targets.
    pub fn targets(&self) -> Vec<Target> {
        let managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        managers.keys().cloned().collect()
    }

    /// Number of registered managers.
    pub fn len(&self) -> usize {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
