//! Server settings read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `SORT_LISTEN`, default `0.0.0.0:8001`.
    pub listen: SocketAddr,
    /// `SORT_STATS_TTL_SECS`, default 600.
    pub stats_ttl: Duration,
    /// `SORT_JOB_DEADLINE_SECS`; jobs run unbounded when unset.
    pub job_deadline: Option<Duration>,
    /// `SORT_JOB_RETENTION_SECS`, default 3600. Finished jobs older than this are pruned.
    pub job_retention: Duration,
    /// `SORT_SQLITE_PATH`; in-memory repositories when unset.
    pub sqlite_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8001)),
            stats_ttl: Duration::from_secs(600),
            job_deadline: None,
            job_retention: Duration::from_secs(3600),
            sqlite_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset or blank variables take the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let listen = match get("SORT_LISTEN") {
            Some(v) => v.trim().parse::<SocketAddr>().map_err(|e| {
                ConfigError::Invalid {
                    var: "SORT_LISTEN",
                    message: e.to_string(),
                }
            })?,
            None => defaults.listen,
        };
        let stats_ttl = seconds("SORT_STATS_TTL_SECS", get("SORT_STATS_TTL_SECS"))?
            .unwrap_or(defaults.stats_ttl);
        let job_deadline = seconds("SORT_JOB_DEADLINE_SECS", get("SORT_JOB_DEADLINE_SECS"))?;
        let job_retention = seconds("SORT_JOB_RETENTION_SECS", get("SORT_JOB_RETENTION_SECS"))?
            .unwrap_or(defaults.job_retention);

        Ok(Self {
            listen,
            stats_ttl,
            job_deadline,
            job_retention,
            sqlite_path: get("SORT_SQLITE_PATH"),
        })
    }
}

fn seconds(var: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|e| ConfigError::Invalid {
            var,
            message: e.to_string(),
        })
}
