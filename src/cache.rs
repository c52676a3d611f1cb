use crate::clock::Clock;
use crate::local::LocalStorage;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CACHE_STORAGE_KEY: &str = "daily-checkin-cache";
pub const DEFAULT_MAX_ENTRIES: usize = 100;

pub fn default_ttl() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub default_ttl: Duration,
    pub max_entries: usize,
    pub storage_key: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            max_entries: DEFAULT_MAX_ENTRIES,
            storage_key: CACHE_STORAGE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    data: Value,
    timestamp: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    sequence: u64,
}

/// Key-value cache with absolute expiry, mirrored into local storage so it
/// survives a restart.
pub struct TtlCache {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
    options: CacheOptions,
    storage: Arc<dyn LocalStorage>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(storage: Arc<dyn LocalStorage>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(storage, clock, CacheOptions::default())
    }

    pub fn with_options(
        storage: Arc<dyn LocalStorage>,
        clock: Arc<dyn Clock>,
        options: CacheOptions,
    ) -> Self {
        let mut cache = Self {
            entries: HashMap::new(),
            next_sequence: 0,
            options,
            storage,
            clock,
        };
        cache.restore();
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value only while `now <= expires_at`; expired or
    /// undecodable entries are dropped and reported as a miss.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;

        if now > entry.expires_at {
            debug!(key, "cache entry expired");
            self.entries.remove(key);
            self.persist();
            return None;
        }

        match serde_json::from_value(entry.data.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, "dropping undecodable cache entry: {err}");
                self.entries.remove(key);
                self.persist();
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, data: &T, ttl: Option<Duration>) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(err) => {
                warn!(key, "value not cacheable: {err}");
                return;
            }
        };

        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.options.default_ttl);
        self.next_sequence += 1;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                timestamp: now,
                expires_at: now + ttl,
                sequence: self.next_sequence,
            },
        );

        self.cleanup();
        self.persist();
    }

    /// Clears everything, or only keys matching a `*` wildcard pattern.
    pub fn invalidate(&mut self, pattern: Option<&str>) {
        match pattern {
            None => self.entries.clear(),
            Some(pattern) => match wildcard_regex(pattern) {
                Ok(regex) => self.entries.retain(|key, _| !regex.is_match(key)),
                Err(err) => {
                    warn!(pattern, "invalid cache pattern: {err}");
                    return;
                }
            },
        }
        self.persist();
    }

    fn cleanup(&mut self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| now <= entry.expires_at);

        while self.entries.len() > self.options.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.timestamp, entry.sequence))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "evicting oldest cache entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn persist(&self) {
        let payload = match serde_json::to_string(&self.entries) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode cache: {err}");
                return;
            }
        };
        if let Err(err) = self.storage.set_item(&self.options.storage_key, &payload) {
            warn!("failed to persist cache: {err}");
        }
    }

    fn restore(&mut self) {
        let raw = match self.storage.get_item(&self.options.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                warn!("failed to read persisted cache: {err}");
                return;
            }
        };

        let entries: HashMap<String, CacheEntry> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("discarding malformed persisted cache: {err}");
                return;
            }
        };

        let now = self.clock.now();
        let before = entries.len();
        self.entries = entries
            .into_iter()
            .filter(|(_, entry)| now <= entry.expires_at)
            .collect();
        self.next_sequence = self
            .entries
            .values()
            .map(|entry| entry.sequence)
            .max()
            .unwrap_or(0);

        if self.entries.len() != before {
            debug!(dropped = before - self.entries.len(), "dropped expired cache entries on load");
            self.persist();
        }
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$"))
}
