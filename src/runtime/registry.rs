//! Bot registry and persistence
//!
//! The registry is an explicitly constructed map from bot name to
//! [`Essence`]. Names are unique and registration is idempotent. The whole pool
//! persists as one checksummed JSON blob so bots can be revived after a
//! restart.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::actor::{Actor, ActorConfig};
use super::error::{RegistryError, RegistryResult, Result};
use super::essence::Essence;
use super::storage::Storage;
use super::task::TaskCatalog;

/// Format version of the persisted blob
pub const REGISTRY_FORMAT_VERSION: u32 = 1;

/// On-disk representation of the pool
#[derive(Debug, Serialize, Deserialize)]
struct RegistryBlob {
    version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    pool: BTreeMap<String, Essence>,
}

/// Persisted map from bot name to essence
#[derive(Debug)]
pub struct Registry {
    storage: Storage,
    path: PathBuf,
    pool: RwLock<BTreeMap<String, Essence>>,
    /// Serializes writers of the blob
    persist: Mutex<()>,
}

impl Registry {
    /// Create an empty registry persisted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            storage: Storage::new(root),
            path,
            pool: RwLock::new(BTreeMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Create a registry at `path`, loading the persisted pool if one exists
    pub fn open(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let registry = Self::new(path);
        if registry.can_load() {
            registry.load()?;
        }
        Ok(registry)
    }

    /// Location of the persisted blob
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register an essence unless its name is already taken
    ///
    /// Returns whether the essence was inserted.
    pub fn sew(&self, essence: Essence) -> bool {
        let mut pool = self.pool.write();
        if pool.contains_key(&essence.name) {
            debug!(bot = %essence.name, "already registered");
            return false;
        }

        info!(bot = %essence.name, "registered");
        pool.insert(essence.name.clone(), essence);
        true
    }

    /// Remove and return the essence registered under `name`
    pub fn retract(&self, name: &str) -> Option<Essence> {
        let removed = self.pool.write().remove(name);
        match &removed {
            Some(_) => info!(bot = name, "retracted"),
            None => warn!(bot = name, "retract of unknown bot"),
        }
        removed
    }

    /// Replace the stored essence wholesale, returning the previous one
    pub fn replace(&self, essence: Essence) -> Option<Essence> {
        debug!(bot = %essence.name, "essence replaced");
        self.pool.write().insert(essence.name.clone(), essence)
    }

    /// Whether `name` is registered
    pub fn check(&self, name: &str) -> bool {
        self.pool.read().contains_key(name)
    }

    /// Get a copy of the essence registered under `name`
    pub fn get(&self, name: &str) -> RegistryResult<Essence> {
        self.pool
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Registered names in order
    pub fn names(&self) -> Vec<String> {
        self.pool.read().keys().cloned().collect()
    }

    /// Copies of every registered essence in name order
    pub fn essences(&self) -> Vec<Essence> {
        self.pool.read().values().cloned().collect()
    }

    /// Number of registered essences
    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.pool.read().is_empty()
    }

    /// Persist the whole pool as one blob
    pub fn save(&self) -> RegistryResult<()> {
        let _guard = self.persist.lock();
        let pool = self.pool.read().clone();

        let blob = RegistryBlob {
            version: REGISTRY_FORMAT_VERSION,
            saved_at: Utc::now(),
            checksum: checksum(&pool)?,
            pool,
        };

        let data = serde_json::to_vec_pretty(&blob).map_err(super::error::StorageError::from)?;
        self.storage.write_atomic(&self.path, &data)?;

        info!(path = %self.path.display(), bots = blob.pool.len(), "registry saved");
        Ok(())
    }

    /// Replace the in-memory pool with the persisted one
    ///
    /// Returns the number of essences loaded.
    pub fn load(&self) -> RegistryResult<usize> {
        let _guard = self.persist.lock();
        let data = self.storage.read_file(&self.path)?;

        let blob: RegistryBlob = serde_json::from_slice(&data)
            .map_err(|err| RegistryError::Corrupted(format!("unreadable blob: {err}")))?;

        if blob.version != REGISTRY_FORMAT_VERSION {
            return Err(RegistryError::Corrupted(format!(
                "unsupported format version {}",
                blob.version
            )));
        }

        let expected = checksum(&blob.pool)?;
        if expected != blob.checksum {
            return Err(RegistryError::Corrupted(format!(
                "checksum mismatch: stored {}, computed {}",
                blob.checksum, expected
            )));
        }

        let count = blob.pool.len();
        *self.pool.write() = blob.pool;

        info!(
            path = %self.path.display(),
            bots = count,
            saved_at = %blob.saved_at,
            "registry loaded"
        );
        Ok(count)
    }

    /// Whether a persisted blob exists
    pub fn can_load(&self) -> bool {
        self.storage.exists(&self.path)
    }

    /// Delete the persisted blob
    pub fn reset(&self) -> RegistryResult<()> {
        let _guard = self.persist.lock();
        self.storage.remove_file(&self.path)?;
        info!(path = %self.path.display(), "registry storage reset");
        Ok(())
    }

    /// Build a stopped actor from the essence registered under `name`
    pub fn revive(&self, name: &str, catalog: &TaskCatalog, config: ActorConfig) -> Result<Actor> {
        let essence = self.get(name)?;
        let actor = Actor::new(essence, catalog, config)?;
        debug!(bot = name, "revived");
        Ok(actor)
    }
}

fn checksum(pool: &BTreeMap<String, Essence>) -> RegistryResult<String> {
    let bytes = serde_json::to_vec(pool).map_err(super::error::StorageError::from)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task::{TaskList, TaskOutcome};
    use serde_json::json;
    use tempfile::TempDir;

    fn essence(name: &str) -> Essence {
        Essence::new(name, TaskList::new().with("sum", "sum", vec![json!(1), json!(1)]))
    }

    #[test]
    fn test_sew_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("needles.json"));

        assert!(registry.sew(essence("T")));
        assert!(!registry.sew(Essence::new("T", TaskList::new())));
        assert_eq!(registry.len(), 1);

        // First registration wins.
        assert!(registry.get("T").unwrap().tasks.contains("sum"));
    }

    #[test]
    fn test_retract_and_missing() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("needles.json"));

        registry.sew(essence("T"));
        assert_eq!(registry.retract("T").unwrap().name, "T");
        assert!(!registry.check("T"));
        assert!(registry.retract("T").is_none());
        assert!(matches!(registry.get("T"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_replace_keeps_history() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("needles.json"));
        registry.sew(essence("T"));

        let mut history = BTreeMap::new();
        history.insert("sum".to_string(), TaskOutcome::Completed { value: json!(2) });
        let previous = registry.replace(essence("T").with_history(history));

        assert!(previous.unwrap().history.is_empty());
        assert_eq!(registry.get("T").unwrap().history.len(), 1);
    }

    #[test]
    fn test_save_load_and_reset() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache").join("needles.json");

        let registry = Registry::new(&path);
        assert!(!registry.can_load());
        registry.sew(essence("A"));
        registry.sew(essence("B"));
        registry.save().unwrap();
        assert!(registry.can_load());

        let fresh = Registry::open(&path).unwrap();
        assert_eq!(fresh.names(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(fresh.get("A").unwrap(), registry.get("A").unwrap());

        fresh.reset().unwrap();
        assert!(!fresh.can_load());
        // Reset only touches storage.
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_revive_binds_tasks() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("needles.json"));
        registry.sew(essence("T"));

        let actor = registry
            .revive("T", &TaskCatalog::with_builtins(), ActorConfig::default())
            .unwrap();
        assert_eq!(actor.name(), "T");
        assert!(!actor.alive());

        assert!(registry
            .revive("missing", &TaskCatalog::with_builtins(), ActorConfig::default())
            .is_err());
    }
}
