//! Filesystem layout helpers and atomic write operations
//!
//! Manages the .shadow/ directory structure, ensures atomic writes via
//! temp files and renames, and persists the runtime configuration.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ShadowConfig;
use super::error::{StorageError, StorageResult};

/// Storage manager for runtime persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Get the registry blob path
    pub fn registry_path(&self) -> PathBuf {
        self.cache_dir().join("needles.json")
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let failed = |detail: String| StorageError::AtomicWriteFailed {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("tmp");

        let mut file = File::create(&temp_path)
            .map_err(|err| failed(format!("create {}: {err}", temp_path.display())))?;
        file.write_all(data)
            .map_err(|err| failed(format!("write: {err}")))?;
        file.sync_all()
            .map_err(|err| failed(format!("sync: {err}")))?;
        drop(file);

        fs::rename(&temp_path, path)
            .map_err(|err| failed(format!("rename from {}: {err}", temp_path.display())))?;

        // Sync parent directory
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let dir = OpenOptions::new()
                .read(true)
                .open(parent)
                .map_err(|err| failed(format!("open directory: {err}")))?;
            dir.sync_all()
                .map_err(|err| failed(format!("sync directory: {err}")))?;
        }

        Ok(())
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    /// Check if a path exists
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        Ok(fs::create_dir_all(path)?)
    }

    /// Remove a file, ignoring one that is already gone
    pub fn remove_file(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Initialize storage directories for a new runtime
pub fn init_storage(root: &Path) -> StorageResult<()> {
    let storage = Storage::new(root.to_path_buf());

    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.cache_dir())?;

    Ok(())
}

/// Write runtime configuration
pub fn write_config(config: &ShadowConfig) -> StorageResult<()> {
    let storage = Storage::new(config.root.clone());
    let json = serde_json::to_vec_pretty(config)?;
    storage.write_atomic(&storage.config_path(), &json)
}

/// Load runtime configuration
pub fn load_config(root: &Path) -> StorageResult<ShadowConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();

    if !storage.exists(&config_path) {
        return Err(StorageError::ConfigError(format!(
            "no config at {}",
            config_path.display()
        )));
    }

    let data = storage.read_file(&config_path)?;
    let config: ShadowConfig = serde_json::from_slice(&data)
        .map_err(|err| StorageError::ConfigError(format!("invalid config: {err}")))?;

    Ok(config)
}
