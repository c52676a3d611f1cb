//! Local key-value storage and the local data adapter built on it.
//!
//! `LocalStorage` mirrors what a browser's local storage offers: synchronous
//! string reads and writes under string keys. The coordinator's local mode and
//! the TTL cache both persist through it.

use crate::errors::StorageError;
use crate::models::AppData;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

pub const LOCAL_DATA_KEY: &str = "daily-checkin-data";

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }
}

/// Reads and writes the local `AppData` blob.
#[derive(Clone)]
pub struct LocalStore {
    storage: Arc<dyn LocalStorage>,
    key: String,
}

impl LocalStore {
    pub fn new(storage: Arc<dyn LocalStorage>, partition: &str) -> Self {
        Self {
            storage,
            key: format!("{LOCAL_DATA_KEY}:{partition}"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Missing, unreadable, or malformed data all yield the seeded default.
    pub fn load(&self) -> AppData {
        let raw = match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "no local data yet");
                return AppData::seeded();
            }
            Err(err) => {
                error!("failed to read local data: {err}");
                return AppData::seeded();
            }
        };

        match serde_json::from_str::<AppData>(&raw) {
            Ok(mut data) => {
                if data.task_groups.is_empty() {
                    data.task_groups = crate::models::default_task_groups();
                }
                data
            }
            Err(err) => {
                warn!("failed to parse local data, starting fresh: {err}");
                AppData::seeded()
            }
        }
    }

    pub fn save(&self, data: &AppData) -> Result<(), StorageError> {
        let payload = serde_json::to_string(data)?;
        self.storage.set_item(&self.key, &payload)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(&self.key)
    }
}

/// Anonymous partition key for local data on this machine. It is a plain
/// FNV-1a hash of host and account names and carries no identity guarantee.
pub fn device_partition_key() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    partition_key_for(&[&user, &host, std::env::consts::OS])
}

pub fn partition_key_for(parts: &[&str]) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    format!("anon-{hash:016x}")
}
