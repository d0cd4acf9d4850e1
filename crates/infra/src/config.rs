//! Configuration loading and representation.
//!
//! Everything is read from environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `USE_PERSISTENT_STORES` | `false` | use Postgres instead of in-memory storage |
//! | `DATABASE_URL` | none | required when `USE_PERSISTENT_STORES` is true |
//! | `DATABASE_MAX_CONNECTIONS` | `5` | connection pool size |
//! | `REPLAY_CLEAR_TIMEOUT_SECS` | `300` | deadline per scheduler clear, `0` disables |
//! | `REPLAY_CLEANUP_TIMEOUT_SECS` | `10` | deadline for recording `Failed` after an interrupted run |
//! | `REPLAY_LOG_FORMAT` | `json` | `json` or `pretty` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use replayer_observability::LogFormat;

use crate::workers::WorkerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayConfig {
    pub use_persistent_stores: bool,
    pub database: Option<DatabaseConfig>,
    pub worker: WorkerConfig,
    pub log_format: LogFormat,
}

impl ReplayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => defaults.use_persistent_stores,
        };

        let max_connections = parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 5u32)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections,
        });
        if use_persistent_stores && database.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let clear_secs = parse_or(
            "REPLAY_CLEAR_TIMEOUT_SECS",
            get("REPLAY_CLEAR_TIMEOUT_SECS"),
            defaults.worker.clear_timeout.map(|d| d.as_secs()).unwrap_or(0),
        )?;
        let cleanup_secs = parse_or(
            "REPLAY_CLEANUP_TIMEOUT_SECS",
            get("REPLAY_CLEANUP_TIMEOUT_SECS"),
            defaults.worker.cleanup_timeout.as_secs(),
        )?;
        let worker = WorkerConfig {
            clear_timeout: (clear_secs > 0).then(|| Duration::from_secs(clear_secs)),
            cleanup_timeout: Duration::from_secs(cleanup_secs),
        };

        let log_format = parse_or("REPLAY_LOG_FORMAT", get("REPLAY_LOG_FORMAT"), defaults.log_format)?;

        Ok(Self {
            use_persistent_stores,
            database,
            worker,
            log_format,
        })
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ReplayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ReplayConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config, ReplayConfig::default());
        assert!(!config.use_persistent_stores);
        assert_eq!(config.worker.clear_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.worker.cleanup_timeout, Duration::from_secs(10));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn persistent_stores_require_database_url() {
        let err = from_vars(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn reads_database_and_worker_settings() {
        let config = from_vars(&[
            ("USE_PERSISTENT_STORES", "1"),
            ("DATABASE_URL", "postgres://replayer:pw@localhost/replays"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("REPLAY_CLEAR_TIMEOUT_SECS", "0"),
            ("REPLAY_CLEANUP_TIMEOUT_SECS", "3"),
            ("REPLAY_LOG_FORMAT", "pretty"),
        ])
        .unwrap();

        let database = config.database.clone().unwrap();
        assert!(config.use_persistent_stores);
        assert_eq!(database.max_connections, 12);
        assert_eq!(config.worker.clear_timeout, None);
        assert_eq!(config.worker.cleanup_timeout, Duration::from_secs(3));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!format!("{database:?}").contains("pw@"));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            from_vars(&[("USE_PERSISTENT_STORES", "maybe")]),
            Err(ConfigError::Invalid { var: "USE_PERSISTENT_STORES", .. })
        ));
        assert!(matches!(
            from_vars(&[("REPLAY_CLEAR_TIMEOUT_SECS", "-1")]),
            Err(ConfigError::Invalid { var: "REPLAY_CLEAR_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            from_vars(&[("DATABASE_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::Invalid { var: "DATABASE_MAX_CONNECTIONS", .. })
        ));
        assert!(matches!(
            from_vars(&[("REPLAY_LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { var: "REPLAY_LOG_FORMAT", .. })
        ));
    }
}
