//! Crate-wide error taxonomy
//!
//! Mirrors the error taxonomy of spec §7. Each variant is owned by the
//! layer that raises it; nothing here is allowed to leak a raw `io::Error`
//! past the supervisor/registry boundary without context.

use std::fmt;

use crate::router::RouteKey;

/// Encoder failed to start, or a precondition for starting it was not met.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("encoder already running")]
    AlreadyRunning,

    #[error("failed to spawn encoder process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("no window matched selector: {0}")]
    WindowNotFound(String),

    #[error("failed to bind port {0}: {1}")]
    PortBind(u16, #[source] std::io::Error),
}

/// Raised while validating a loaded [`crate::config::InstanceConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("field `{field}`: {message}")]
    InvalidField { field: String, message: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Attempted registration of a route that already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConflict(pub RouteKey);

impl fmt::Display for RouteConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route already registered: {}", self.0)
    }
}

impl std::error::Error for RouteConflict {}

/// Registry-level errors surfaced to CLI/API callers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no instance named `{0}`")]
    NoSuchInstance(String),

    #[error("instance `{0}` already exists")]
    AlreadyExists(String),

    #[error("instance `{0}` must be stopped before this operation")]
    NotStopped(String),

    #[error("no free port available starting from {0}")]
    NoFreePort(u16),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    Route(#[from] RouteConflict),
}
