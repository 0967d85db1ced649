use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{CacheConfig, DiskCacheConfig, MemoryCacheConfig};

/// File-facing cache configuration.
///
/// Limits are plain numbers with `0` meaning unlimited, which maps onto the
/// internal `Option` limits in [`to_cache_config`](Self::to_cache_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub memory: MemorySettings,
    pub disk: DiskSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub count_limit: u64,
    pub cost_limit: u64,
    pub age_limit_secs: u64,
    pub auto_trim_interval_secs: u64,
    pub clear_on_memory_pressure: bool,
    pub clear_on_backgrounding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSettings {
    pub inline_threshold_bytes: usize,
    pub count_limit: u64,
    pub cost_limit: u64,
    pub age_limit_secs: u64,
    pub free_disk_space_limit_bytes: u64,
    pub auto_trim_interval_secs: u64,
    pub error_logs_enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory: MemorySettings {
                count_limit: 0,
                cost_limit: 0,
                age_limit_secs: 0,
                auto_trim_interval_secs: 5,
                clear_on_memory_pressure: true,
                clear_on_backgrounding: true,
            },
            disk: DiskSettings {
                inline_threshold_bytes: 20 * 1024,
                count_limit: 0,
                cost_limit: 0,
                age_limit_secs: 0,
                free_disk_space_limit_bytes: 0,
                auto_trim_interval_secs: 60,
                error_logs_enabled: false,
            },
        }
    }
}

fn limit(raw: u64) -> Option<u64> {
    if raw == 0 {
        None
    } else {
        Some(raw)
    }
}

fn age(raw_secs: u64) -> Option<Duration> {
    if raw_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(raw_secs))
    }
}

impl CacheSettings {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: CacheSettings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Convert to the internal config pair
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            memory: self.to_memory_config(),
            disk: self.to_disk_config(),
        }
    }

    pub fn to_memory_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            count_limit: limit(self.memory.count_limit),
            cost_limit: limit(self.memory.cost_limit),
            age_limit: age(self.memory.age_limit_secs),
            auto_trim_interval: Duration::from_secs(self.memory.auto_trim_interval_secs),
            clear_on_memory_pressure: self.memory.clear_on_memory_pressure,
            clear_on_backgrounding: self.memory.clear_on_backgrounding,
        }
    }

    pub fn to_disk_config(&self) -> DiskCacheConfig {
        DiskCacheConfig {
            inline_threshold: self.disk.inline_threshold_bytes,
            count_limit: limit(self.disk.count_limit),
            cost_limit: limit(self.disk.cost_limit),
            age_limit: age(self.disk.age_limit_secs),
            free_disk_space_limit: limit(self.disk.free_disk_space_limit_bytes),
            auto_trim_interval: Duration::from_secs(self.disk.auto_trim_interval_secs),
            error_logs_enabled: self.disk.error_logs_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_unlimited() {
        let settings = CacheSettings::default();
        let config = settings.to_cache_config();

        assert!(config.memory.count_limit.is_none());
        assert!(config.memory.cost_limit.is_none());
        assert!(config.memory.age_limit.is_none());
        assert_eq!(config.memory.auto_trim_interval, Duration::from_secs(5));
        assert_eq!(config.disk.inline_threshold, 20 * 1024);
        assert_eq!(config.disk.auto_trim_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
memory:
  count_limit: 1000
  cost_limit: 0
  age_limit_secs: 3600
  auto_trim_interval_secs: 5
  clear_on_memory_pressure: true
  clear_on_backgrounding: false
disk:
  inline_threshold_bytes: 4096
  count_limit: 0
  cost_limit: 104857600
  age_limit_secs: 0
  free_disk_space_limit_bytes: 0
  auto_trim_interval_secs: 120
  error_logs_enabled: true
"#;
        let settings: CacheSettings = serde_yaml::from_str(yaml).unwrap();
        let config = settings.to_cache_config();

        assert_eq!(config.memory.count_limit, Some(1000));
        assert!(config.memory.cost_limit.is_none());
        assert_eq!(config.memory.age_limit, Some(Duration::from_secs(3600)));
        assert!(!config.memory.clear_on_backgrounding);
        assert_eq!(config.disk.inline_threshold, 4096);
        assert_eq!(config.disk.cost_limit, Some(104_857_600));
        assert_eq!(config.disk.auto_trim_interval, Duration::from_secs(120));
        assert!(config.disk.error_logs_enabled);
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(CacheSettings::from_file("/nonexistent/strata.yml").is_err());
    }
}
