//! Values exchanged with the container runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health as the runtime reports it for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// The unit defines no health check.
    NoHealthCheck,
}

/// One health query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitHealth {
    pub health: ReportedHealth,
    pub running: bool,
}

impl UnitHealth {
    pub fn running(health: ReportedHealth) -> Self {
        Self {
            health,
            running: true,
        }
    }

    /// Unit has no container, or its container is not running.
    pub fn absent() -> Self {
        Self {
            health: ReportedHealth::Starting,
            running: false,
        }
    }
}

/// Initial state of a unit right after its group was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit: String,
    /// Runtime state string, e.g. `running`, `created`, `exited`.
    pub state: String,
}

/// An existing network as the runtime sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub driver: String,
    pub attachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCreate {
    Created,
    /// Lost a race with another creator; treated as success.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Ask units to stop, waiting at most `timeout`.
    Graceful { timeout: Duration },
    /// Terminate immediately.
    Force,
}
