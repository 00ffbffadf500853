//! Runtime orchestrator and public API
//!
//! This module provides the main `Runtime` struct that wires storage, the bot
//! registry and the task catalog together, and exposes the network service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// Submodules
pub mod actor;
pub mod error;
pub mod essence;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod service_client;
pub mod storage;
pub mod task;
pub mod worker;

use actor::{Actor, ActorConfig};
use error::{Result, RuntimeError};
use registry::Registry;
use service::{Server, Service};
use storage::Storage;
use task::TaskCatalog;

/// Configuration for the Shadow runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Root directory for runtime storage (default: .shadow/)
    pub root: PathBuf,

    /// Host the network service binds to
    pub host: String,

    /// Port the network service binds to
    pub port: u16,

    /// Bound on joining a worker, in milliseconds
    pub wait_timeout_ms: u64,

    /// Bound on a bot answering a request, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".shadow"),
            host: "127.0.0.1".to_string(),
            port: 8888,
            wait_timeout_ms: 10_000,
            request_timeout_ms: 15_000,
        }
    }
}

impl ShadowConfig {
    /// Defaults overridden by environment variables
    ///
    /// Optional:
    /// - `SHADOW_ROOT`: storage root (default: .shadow)
    /// - `SHADOW_HOST`: bind host (default: 127.0.0.1)
    /// - `SHADOW_PORT`: bind port (default: 8888)
    /// - `SHADOW_WAIT_TIMEOUT_MS`: worker join bound (default: 10000)
    /// - `SHADOW_REQUEST_TIMEOUT_MS`: bot request bound (default: 15000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(root) = lookup("SHADOW_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Some(host) = lookup("SHADOW_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("SHADOW_PORT") {
            config.port = parse_var("SHADOW_PORT", &port)?;
        }
        if let Some(ms) = lookup("SHADOW_WAIT_TIMEOUT_MS") {
            config.wait_timeout_ms = parse_var("SHADOW_WAIT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("SHADOW_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("SHADOW_REQUEST_TIMEOUT_MS", &ms)?;
        }

        Ok(config)
    }

    /// Actor timeouts derived from this configuration
    pub fn actor_config(&self) -> ActorConfig {
        ActorConfig {
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// `host:port` the service binds to
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RuntimeError::Config(format!("invalid value for {key}: {value:?}")))
}

/// The main runtime orchestrator
///
/// Owns the registry and the task catalog for the lifetime of the process and
/// hands shared references to the service and to revived bots.
pub struct Runtime {
    config: ShadowConfig,
    storage: Storage,
    registry: Arc<Registry>,
    catalog: Arc<TaskCatalog>,
}

impl Runtime {
    /// Create a runtime, loading the persisted registry if one exists
    pub fn new(config: ShadowConfig, catalog: TaskCatalog) -> Result<Self> {
        let storage = Storage::new(config.root.clone());
        let registry = Registry::open(storage.registry_path())?;

        info!(
            root = %config.root.display(),
            bots = registry.len(),
            tasks = catalog.names().len(),
            "runtime ready"
        );

        Ok(Self {
            config,
            storage,
            registry: Arc::new(registry),
            catalog: Arc::new(catalog),
        })
    }

    /// Initialize runtime storage directories and configuration
    pub fn init(config: &ShadowConfig) -> Result<()> {
        storage::init_storage(&config.root)?;
        storage::write_config(config)?;
        Ok(())
    }

    /// Load an existing runtime from storage
    pub fn load(root: PathBuf, catalog: TaskCatalog) -> Result<Self> {
        let config = storage::load_config(&root)?;
        Self::new(config, catalog)
    }

    /// Get the current configuration
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Get the storage manager
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Shared bot registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Shared task catalog
    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    /// Build a stopped bot from its registered essence
    pub fn revive(&self, name: &str) -> Result<Actor> {
        self.registry
            .revive(name, &self.catalog, self.config.actor_config())
    }

    /// Service over this runtime's registry and catalog
    pub fn service(&self) -> Service {
        Service::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.config.actor_config(),
        )
    }

    /// Bind the network service on the configured address
    pub async fn bind(&self) -> Result<Server> {
        let server = Server::bind(self.config.addr(), Arc::new(self.service())).await?;
        Ok(server)
    }
}
