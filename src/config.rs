use crate::cache::{CacheOptions, TtlCache, DEFAULT_MAX_ENTRIES};
use crate::clock::{Clock, SystemClock};
use crate::cloud::{CloudStore, HttpCloudClient, DEFAULT_HISTORY_DAYS};
use crate::coordinator::Coordinator;
use crate::local::{device_partition_key, FileStorage, LocalStorage, LocalStore};
use crate::storage::resolve_data_path;
use chrono::Duration;
use std::{env, path::PathBuf, str::FromStr, sync::Arc};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, std::io::Error> {
        Ok(Self {
            port: env_or("PORT", 8080),
            data_path: resolve_data_path()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub local_dir: PathBuf,
    pub cache_ttl_secs: i64,
    pub cache_max_entries: usize,
    pub refresh_delay_ms: i64,
    pub history_days: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            local_dir: PathBuf::from("data/local"),
            cache_ttl_secs: 300,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            refresh_delay_ms: 1000,
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env::var("CHECKIN_API_URL").unwrap_or(defaults.api_url),
            local_dir: env::var("CHECKIN_LOCAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_dir),
            cache_ttl_secs: env_or("CHECKIN_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            cache_max_entries: env_or("CHECKIN_CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            refresh_delay_ms: env_or("CHECKIN_REFRESH_DELAY_MS", defaults.refresh_delay_ms),
            history_days: env_or("CHECKIN_HISTORY_DAYS", defaults.history_days),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            default_ttl: Duration::seconds(self.cache_ttl_secs.max(0)),
            max_entries: self.cache_max_entries.max(1),
            ..CacheOptions::default()
        }
    }

    /// Coordinator over file-backed local storage and the HTTP API.
    pub fn build_coordinator(&self) -> Coordinator<HttpCloudClient> {
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::new(&self.local_dir));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        self.build_coordinator_with(storage, clock)
    }

    pub fn build_coordinator_with(
        &self,
        storage: Arc<dyn LocalStorage>,
        clock: Arc<dyn Clock>,
    ) -> Coordinator<HttpCloudClient> {
        let cache = TtlCache::with_options(storage.clone(), clock.clone(), self.cache_options());
        let cloud = CloudStore::new(HttpCloudClient::new(&self.api_url), cache, clock.clone())
            .with_history_days(self.history_days);
        let local = LocalStore::new(storage, &device_partition_key());

        Coordinator::new(local, cloud, clock)
            .with_refresh_delay(Duration::milliseconds(self.refresh_delay_ms.max(0)))
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring invalid {name}={raw}, using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordinator::DataSource;
    use crate::local::MemoryStorage;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        let options = config.cache_options();
        assert_eq!(options.default_ttl, Duration::minutes(5));
        assert_eq!(options.max_entries, 100);
        assert_eq!(config.history_days, 30);
    }

    #[test]
    fn unset_variable_uses_default() {
        assert_eq!(env_or("DAILY_CHECKIN_TEST_UNSET_VAR", 42u16), 42);
    }

    #[test]
    fn builds_local_first_coordinator() {
        let config = ClientConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            ..ClientConfig::default()
        };
        let clock = Arc::new(ManualClock::at_date(
            chrono::NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        ));
        let coordinator = config.build_coordinator_with(Arc::new(MemoryStorage::new()), clock);
        assert_eq!(coordinator.data_source(), DataSource::Local);
        assert_eq!(coordinator.cloud().api().base_url(), "http://127.0.0.1:9");
    }
}
