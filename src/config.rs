//! Configuration management for the partition gateway
//!
//! Read once at startup from the environment (after `.env` is loaded).
//! Parsing goes through a lookup function so tests never touch the real
//! process environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::admission::{GateSettings, MemoryPolicy};
use crate::dispatch::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_WORKERS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

const MB: u64 = 1024 * 1024;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 6989;
const DEFAULT_MAX_UPLOAD_MB: u64 = 1024;
const DEFAULT_ENGINE_URL: &str = "http://localhost:8500";
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_SPLIT_SIZE: usize = 1;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_FREE_MINIMUM_MB: u64 = 2048;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub parallel: ParallelConfig,
    pub admission: AdmissionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `None` skips the check entirely
    pub api_key: Option<String>,
    /// `None` accepts any media type and leaves detection to the engine
    pub allowed_mimetypes: Option<Vec<String>>,
    /// `None` leaves CORS off
    pub allowed_origins: Option<Vec<String>>,
    /// Bounds request bodies and decompressed gzip uploads
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_key: None,
            allowed_mimetypes: None,
            allowed_origins: None,
            max_upload_bytes: (DEFAULT_MAX_UPLOAD_MB * MB) as usize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENGINE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub enabled: bool,
    /// Sibling `/general` endpoint; chunks stay in-process when unset
    pub url: Option<String>,
    pub split_size: usize,
    pub threads: usize,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            split_size: DEFAULT_SPLIT_SIZE,
            threads: DEFAULT_WORKERS,
            retry_attempts: DEFAULT_RETRIES,
            retry_initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl ParallelConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts.saturating_add(1),
            self.retry_initial_delay,
            self.retry_max_delay,
        )
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub memory_policy: MemoryPolicy,
    pub check_on_admit: bool,
    /// 0 means unlimited
    pub max_concurrent_requests: usize,
    pub strict_readiness: bool,
    pub single_shot: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            memory_policy: MemoryPolicy::default(),
            check_on_admit: true,
            max_concurrent_requests: 0,
            strict_readiness: false,
            single_shot: false,
        }
    }
}

impl AdmissionConfig {
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            policy: self.memory_policy,
            check_on_admit: self.check_on_admit,
            max_concurrent: (self.max_concurrent_requests > 0).then_some(self.max_concurrent_requests),
            strict_readiness: self.strict_readiness,
            single_shot: self.single_shot,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let max_upload_bytes = vars.megabytes("UNSTRUCTURED_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        let server = ServerConfig {
            host: vars.string("UNSTAPI_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: vars.parse("UNSTAPI_PORT", DEFAULT_PORT)?,
            api_key: vars.string("UNSTRUCTURED_API_KEY"),
            allowed_mimetypes: vars.list("UNSTRUCTURED_ALLOWED_MIMETYPES"),
            allowed_origins: vars.list("ALLOWED_ORIGINS"),
            max_upload_bytes: usize::try_from(max_upload_bytes).map_err(|e| {
                ConfigError::invalid("UNSTRUCTURED_MAX_UPLOAD_MB", &max_upload_bytes.to_string(), e)
            })?,
        };

        let engine = EngineConfig {
            url: vars
                .string("UNSTRUCTURED_ENGINE_URL")
                .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string()),
            timeout: Duration::from_secs(vars.parse("UNSTRUCTURED_ENGINE_TIMEOUT_SECS", DEFAULT_ENGINE_TIMEOUT_SECS)?),
        };

        let parallel = ParallelConfig {
            enabled: vars.flag("UNSTRUCTURED_PARALLEL_MODE_ENABLED", false)?,
            url: vars.string("UNSTRUCTURED_PARALLEL_MODE_URL"),
            split_size: vars.positive("UNSTRUCTURED_PARALLEL_MODE_SPLIT_SIZE", DEFAULT_SPLIT_SIZE)?,
            threads: vars.positive("UNSTRUCTURED_PARALLEL_MODE_THREADS", DEFAULT_WORKERS)?,
            retry_attempts: vars.parse("UNSTRUCTURED_PARALLEL_RETRY_ATTEMPTS", DEFAULT_RETRIES)?,
            retry_initial_delay: Duration::from_millis(
                vars.parse("UNSTRUCTURED_PARALLEL_RETRY_INITIAL_DELAY_MS", DEFAULT_RETRY_INITIAL_DELAY_MS)?,
            ),
            retry_max_delay: Duration::from_millis(
                vars.parse("UNSTRUCTURED_PARALLEL_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS)?,
            ),
        };

        let memory_policy = match vars.string("UNSTRUCTURED_MEMORY_CHECK_MODE").as_deref() {
            None | Some("threshold") => {
                let threshold: f64 = vars.parse("UNSTRUCTURED_MEMORY_THRESHOLD", 0.8)?;
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(ConfigError::invalid(
                        "UNSTRUCTURED_MEMORY_THRESHOLD",
                        &threshold.to_string(),
                        "must be in (0, 1]",
                    ));
                }
                MemoryPolicy::Threshold(threshold)
            }
            Some("free_minimum") => MemoryPolicy::FreeMinimum {
                bytes: vars.megabytes("UNSTRUCTURED_MEMORY_FREE_MINIMUM_MB", DEFAULT_FREE_MINIMUM_MB)?,
            },
            Some(other) => {
                return Err(ConfigError::invalid(
                    "UNSTRUCTURED_MEMORY_CHECK_MODE",
                    other,
                    "expected threshold or free_minimum",
                ))
            }
        };

        let admission = AdmissionConfig {
            memory_policy,
            check_on_admit: vars.flag("UNSTRUCTURED_MEMORY_CHECK_ON_ADMIT", true)?,
            max_concurrent_requests: vars.parse("UNSTRUCTURED_MAX_CONCURRENT_REQUESTS", 0)?,
            strict_readiness: vars.flag("UNSTRUCTURED_STRICT_READINESS", false)?,
            single_shot: vars.flag("UNSTRUCTURED_SINGLE_SHOT", false)?,
        };

        Ok(Config {
            server,
            engine,
            parallel,
            admission,
        })
    }
}

/// Typed access over a variable lookup
struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e| ConfigError::invalid(name, &value, e)),
        }
    }

    /// A size given in megabytes, returned in bytes
    fn megabytes(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        let mb: u64 = self.parse(name, default)?;
        mb.checked_mul(MB)
            .ok_or_else(|| ConfigError::invalid(name, &mb.to_string(), "too large"))
    }

    fn positive(&self, name: &'static str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse(name, default)?;
        if value == 0 {
            return Err(ConfigError::invalid(name, "0", "must be at least 1"));
        }
        Ok(value)
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(name).map(|v| v.to_lowercase()).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes") => Ok(true),
            Some("false" | "0" | "no") => Ok(false),
            Some(other) => Err(ConfigError::invalid(name, other, "expected true or false")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.server.port, 6989);
        assert!(config.server.api_key.is_none());
        assert!(config.server.allowed_origins.is_none());
        assert!(config.server.allowed_mimetypes.is_none());
        assert_eq!(config.server.max_upload_bytes, 1024 * 1024 * 1024);
        assert!(!config.parallel.enabled);
        assert_eq!(config.parallel.split_size, 1);
        assert_eq!(config.parallel.threads, 3);
        assert_eq!(config.parallel.retry_policy().max_attempts(), 3);
        assert_eq!(config.admission.memory_policy, MemoryPolicy::Threshold(0.8));
        assert!(config.admission.gate_settings().max_concurrent.is_none());
    }

    #[test]
    fn test_parallel_settings() {
        let config = config(&[
            ("UNSTRUCTURED_PARALLEL_MODE_ENABLED", "TRUE"),
            ("UNSTRUCTURED_PARALLEL_MODE_URL", "http://peer:6989/general/v0/general"),
            ("UNSTRUCTURED_PARALLEL_MODE_SPLIT_SIZE", "4"),
            ("UNSTRUCTURED_PARALLEL_RETRY_ATTEMPTS", "5"),
        ])
        .unwrap();

        assert!(config.parallel.enabled);
        assert_eq!(config.parallel.url.as_deref(), Some("http://peer:6989/general/v0/general"));
        assert_eq!(config.parallel.split_size, 4);
        assert_eq!(config.parallel.retry_policy().max_attempts(), 6);
    }

    #[test]
    fn test_zero_split_size_is_fatal() {
        let err = config(&[("UNSTRUCTURED_PARALLEL_MODE_SPLIT_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("UNSTRUCTURED_PARALLEL_MODE_SPLIT_SIZE"));
    }

    #[test]
    fn test_non_numeric_is_fatal() {
        assert!(config(&[("UNSTAPI_PORT", "http")]).is_err());
        assert!(config(&[("UNSTRUCTURED_PARALLEL_MODE_THREADS", "-1")]).is_err());
    }

    #[test]
    fn test_memory_modes() {
        let config_free = config(&[
            ("UNSTRUCTURED_MEMORY_CHECK_MODE", "free_minimum"),
            ("UNSTRUCTURED_MEMORY_FREE_MINIMUM_MB", "512"),
        ])
        .unwrap();
        assert_eq!(config_free.admission.memory_policy, MemoryPolicy::free_minimum_mb(512));

        assert!(config(&[("UNSTRUCTURED_MEMORY_THRESHOLD", "1.5")]).is_err());
        assert!(config(&[("UNSTRUCTURED_MEMORY_CHECK_MODE", "vibes")]).is_err());
    }

    #[test]
    fn test_lists_are_split_and_trimmed() {
        let config = config(&[
            ("UNSTRUCTURED_ALLOWED_MIMETYPES", "application/pdf, text/plain,"),
            ("ALLOWED_ORIGINS", "https://a.example,https://b.example"),
            ("UNSTRUCTURED_MAX_CONCURRENT_REQUESTS", "2"),
        ])
        .unwrap();

        assert_eq!(
            config.server.allowed_mimetypes,
            Some(vec!["application/pdf".to_string(), "text/plain".to_string()])
        );
        assert_eq!(config.server.allowed_origins.unwrap().len(), 2);
        assert_eq!(config.admission.gate_settings().max_concurrent, Some(2));
    }

    #[test]
    fn test_defaults_match_empty_environment() {
        let parsed = config(&[]).unwrap();
        let default = Config::default();

        assert_eq!(parsed.server.max_upload_bytes, default.server.max_upload_bytes);
        assert_eq!(parsed.engine.timeout, default.engine.timeout);
        assert_eq!(parsed.parallel.retry_max_delay, default.parallel.retry_max_delay);
        assert_eq!(parsed.admission.memory_policy, default.admission.memory_policy);
    }

    #[test]
    fn test_oversized_values_are_rejected() {
        let err = config(&[("UNSTRUCTURED_MAX_UPLOAD_MB", "18446744073709551615")]).unwrap_err();
        assert!(err.to_string().contains("UNSTRUCTURED_MAX_UPLOAD_MB"));

        let err = config(&[
            ("UNSTRUCTURED_MEMORY_CHECK_MODE", "free_minimum"),
            ("UNSTRUCTURED_MEMORY_FREE_MINIMUM_MB", "18446744073709551615"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("UNSTRUCTURED_MEMORY_FREE_MINIMUM_MB"));

        let config = config(&[("UNSTRUCTURED_PARALLEL_RETRY_ATTEMPTS", "4294967295")]).unwrap();
        assert_eq!(config.parallel.retry_policy().max_attempts(), u32::MAX);
    }
}
