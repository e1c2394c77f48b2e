//! tenantgrid-health — health verification and monitoring for TenantGrid.
//!
//! # Architecture
//!
//! ```text
//! HealthVerifier::verify(units)
//!   ├── one task per unit (JoinSet)
//!   │   ├── PollTracker (settle rules, backoff on query errors)
//!   │   └── ContainerRuntime::unit_health() until settled or deadline
//!   └── join all → per-unit UnitHealthReport → aggregate_verdict()
//!
//! Reporter::sample() / Reporter::run(interval, shutdown)
//!   ├── unit health for every defined unit
//!   ├── host load + memory from /proc
//!   └── http_probe() per configured target
//! ```
//!
//! A unit without a health check counts as healthy only while it is
//! running. Repeated failures of the health query itself mark the unit
//! unhealthy instead of waiting out its timeout.

pub mod checker;
pub mod monitor;
pub mod verifier;

pub use checker::{http_probe, PollTracker, ProbeResult};
pub use monitor::{HostUsage, MonitorReport, ProbeSample, Reporter, UnitSample};
pub use verifier::{aggregate_verdict, HealthVerifier};
