pub mod catalog;
pub mod config;
pub mod credentials;
pub mod types;

pub use catalog::{CatalogError, Resolution, ResolveWarning, resolve};
pub use config::{ConfigError, OrchestratorConfig, ProbeTarget, parse_duration};
pub use credentials::{CredentialReport, CredentialSet, CredentialSource, CredentialWarning};
pub use types::*;
