//! Error types for the Shadow runtime
//!
//! Domain errors use thiserror; every error that can cross the wire carries a
//! stable `kind()` string so remote callers can tell failures apart.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Actor-related errors
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    /// Registry-related errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Socket or other IO errors outside of storage
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Actor and worker errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    /// The actor has no task bound to this signal
    #[error("Task '{signal}' not found on {actor}")]
    TaskNotFound {
        /// Actor name
        actor: String,
        /// Requested signal
        signal: String,
    },

    /// A descriptor names a callable the catalog does not provide
    #[error("Signal '{signal}' refers to unknown task '{task}'")]
    UnknownTask {
        /// Signal the descriptor is bound to
        signal: String,
        /// Catalog identifier that failed to resolve
        task: String,
    },

    /// No outstanding worker exists for this signal
    #[error("Task '{0}' has not been performed")]
    NotPerformed(String),

    /// Joining a worker exceeded the bound
    #[error("Task '{signal}' timed out after {timeout_ms}ms")]
    WorkerTimeout {
        /// Signal being waited on
        signal: String,
        /// Bound that was exceeded
        timeout_ms: u64,
    },

    /// The actor is not running
    #[error("{0} is not running")]
    NotAlive(String),

    /// The actor did not answer a request in time
    #[error("{actor} did not answer within {timeout_ms}ms")]
    RequestTimeout {
        /// Actor name
        actor: String,
        /// Bound that was exceeded
        timeout_ms: u64,
    },

    /// The OS refused to create an execution unit
    #[error("Failed to spawn: {0}")]
    Spawn(String),

    /// Transport failure while talking to a remote actor
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote service rejected the request
    #[error("Remote error ({kind}): {message}")]
    Remote {
        /// Machine-readable error kind reported by the service
        kind: String,
        /// Human-readable message
        message: String,
    },
}

impl ActorError {
    /// Stable machine-readable kind used on the wire
    pub fn kind(&self) -> &str {
        match self {
            ActorError::TaskNotFound { .. } => "task_not_found",
            ActorError::UnknownTask { .. } => "unknown_task",
            ActorError::NotPerformed(_) => "not_performed",
            ActorError::WorkerTimeout { .. } => "worker_timeout",
            ActorError::NotAlive(_) => "not_alive",
            ActorError::RequestTimeout { .. } => "request_timeout",
            ActorError::Spawn(_) => "spawn",
            ActorError::Transport(_) => "transport",
            ActorError::Remote { kind, .. } => kind,
        }
    }
}

/// Convenience result alias for actor operations
pub type ActorResult<T> = std::result::Result<T, ActorError>;

/// Registry-specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No essence is registered under this name
    #[error("Bot '{0}' not found")]
    NotFound(String),

    /// The persisted blob could not be trusted
    #[error("Registry cache corrupted: {0}")]
    Corrupted(String),

    /// Underlying storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RegistryError {
    /// Stable machine-readable kind used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Corrupted(_) => "corrupted",
            RegistryError::Storage(_) => "storage",
        }
    }
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Config file error
    #[error("Config file error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
