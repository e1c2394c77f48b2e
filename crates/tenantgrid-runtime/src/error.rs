//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the container runtime or the template renderer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{0} is not available")]
    Unavailable(String),

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("failed to run `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("unexpected runtime output: {0}")]
    Parse(String),

    #[error("render failed: {0}")]
    Render(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
