//! Local file backend for state storage
//!
//! This backend stores state in a local JSON file (default: vpnlab.tfstate.json).
//! A `.lock` file next to it guards apply and destroy. The lock file is
//! created exclusively, so two runs cannot both pass the check.

use async_trait::async_trait;
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

/// Local file backend
pub struct LocalBackend {
    /// Path to the state file
    state_path: PathBuf,
    /// Path to the lock file
    lock_path: PathBuf,
}

impl LocalBackend {
    /// Default state file name
    pub const DEFAULT_STATE_FILE: &'static str = "vpnlab.tfstate.json";

    /// Create a new LocalBackend with default paths (vpnlab.tfstate.json in current directory)
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Create a new LocalBackend with a specific state file path
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = match config.attributes.get("path") {
            None => PathBuf::from(Self::DEFAULT_STATE_FILE),
            Some(_) => config
                .get_string("path")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| BackendError::configuration("'path' must be a non-empty string"))?,
        };

        Ok(Self::with_path(path))
    }

    /// Get the state file path
    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    /// The current lock; a lock file that does not parse counts as held
    fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        let content = match std::fs::read_to_string(&self.lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        };
        serde_json::from_str::<LockInfo>(&content)
            .map(Some)
            .map_err(|e| {
                BackendError::InvalidState(format!(
                    "Lock file {} is incomplete or corrupt ({}); another run may still be \
                     writing it, otherwise remove it with force-unlock",
                    self.lock_path.display(),
                    e
                ))
            })
    }

    /// Write the lock file only if none exists. `Ok(false)` when one does.
    fn create_lock_file(&self, lock: &LockInfo) -> BackendResult<bool> {
        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::Io(format!("Failed to create lock directory: {}", e)))?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(BackendError::Io(format!("Failed to create lock file: {}", e))),
        };
        if let Err(e) = file.write_all(content.as_bytes()).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&self.lock_path);
            return Err(BackendError::Io(format!("Failed to write lock file: {}", e)));
        }
        Ok(true)
    }

    /// Move an expired lock out of the way.
    ///
    /// The file is renamed aside first and its ID checked, so a fresh lock
    /// written by a competing run in the meantime is put back, not deleted.
    fn clear_expired_lock(&self, expired: &LockInfo) -> BackendResult<()> {
        let aside = self
            .lock_path
            .with_extension(format!("lock.{}", uuid::Uuid::new_v4()));
        match std::fs::rename(&self.lock_path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BackendError::Io(format!("Failed to move lock file: {}", e))),
        }

        let moved = std::fs::read_to_string(&aside)
            .ok()
            .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok());
        match moved {
            Some(moved) if moved.id == expired.id => {
                std::fs::remove_file(&aside)
                    .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
            }
            other => {
                // Restoring fails only if yet another lock appeared; either way the state stays locked
                let _ = std::fs::hard_link(&aside, &self.lock_path);
                let _ = std::fs::remove_file(&aside);
                Err(match other {
                    Some(moved) => BackendError::locked(&moved),
                    None => BackendError::InvalidState(format!(
                        "Lock file {} changed while replacing an expired lock",
                        self.lock_path.display()
                    )),
                })
            }
        }
    }

    fn remove_lock(&self) -> BackendResult<()> {
        std::fs::remove_file(&self.lock_path)
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        if !self.state_path.exists() {
            debug!("no state at {}", self.state_path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.state_path)
            .map_err(|e| BackendError::Io(format!("Failed to read state file: {}", e)))?;

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(existing) = self.read_state().await?
            && existing.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: existing.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::Io(format!("Failed to create state directory: {}", e)))?;
        }

        std::fs::write(&self.state_path, content)
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        debug!(
            "wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation, self.location());
        if self.create_lock_file(&lock)? {
            debug!("acquired lock {} ({})", lock.id, lock);
            return Ok(lock);
        }

        match self.read_lock()? {
            Some(existing) if !existing.is_expired() => {
                return Err(BackendError::locked(&existing));
            }
            Some(existing) => {
                warn!("taking over expired lock {} ({})", existing.id, existing);
                self.clear_expired_lock(&existing)?;
            }
            // Released between the two checks
            None => {}
        }

        if self.create_lock_file(&lock)? {
            debug!("acquired lock {} ({})", lock.id, lock);
            return Ok(lock);
        }
        match self.read_lock()? {
            Some(existing) => Err(BackendError::locked(&existing)),
            None => Err(BackendError::Io(format!(
                "Lock file {} kept changing while acquiring the lock",
                self.lock_path.display()
            ))),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing_lock = self
            .read_lock()?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing_lock.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing_lock.id,
            });
        }

        self.remove_lock()
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        if !self.lock_path.exists() {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        }

        match self.read_lock() {
            Ok(Some(existing_lock)) if existing_lock.id != lock_id => {
                return Err(BackendError::LockMismatch {
                    expected: lock_id.to_string(),
                    actual: existing_lock.id,
                });
            }
            Ok(_) => {}
            // A corrupt lock file has no ID to check against
            Err(BackendError::InvalidState(reason)) => {
                warn!("removing unreadable lock: {}", reason);
            }
            Err(e) => return Err(e),
        }

        self.remove_lock()
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}
