use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Number of worker tasks per pool process. Zero disables the
    /// embedded pool in the API binary.
    pub worker_pool_size: usize,
    /// Lease validity window for a claimed job.
    pub worker_lease_ttl: Duration,
    /// Retry ceiling applied when a submission omits `max_retries`.
    pub worker_max_retries: i32,
    /// Idle poll cadence for workers.
    pub worker_poll_interval: Duration,
    /// Tenant rate-limit default; overridable per tenant row.
    pub default_rate_limit_per_minute: i32,
    /// Tenant concurrency default; overridable per tenant row.
    pub default_max_concurrent_jobs: i32,
    /// How long shutdown waits for in-flight jobs to drain.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// The seam `from_env` goes through; tests feed it a map instead of
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{} must be a valid number", key)),
                None => Ok(default),
            }
        };
        let parse_i32 = |key: &str, default: i32| -> Result<i32> {
            match lookup(key) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{} must be a valid number", key)),
                None => Ok(default),
            }
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: lookup("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_pool_size: parse_u64("WORKER_POOL_SIZE", 4)? as usize,
            worker_lease_ttl: Duration::from_secs(parse_u64("WORKER_LEASE_TTL_SECONDS", 300)?),
            worker_max_retries: parse_i32("WORKER_MAX_RETRIES", 3)?,
            worker_poll_interval: Duration::from_secs(parse_u64(
                "WORKER_POLL_INTERVAL_SECONDS",
                1,
            )?),
            default_rate_limit_per_minute: parse_i32("DEFAULT_RATE_LIMIT_PER_MINUTE", 60)?,
            default_max_concurrent_jobs: parse_i32("DEFAULT_MAX_CONCURRENT_JOBS", 10)?,
            shutdown_grace: Duration::from_secs(parse_u64("SHUTDOWN_GRACE_SECONDS", 30)?),
        })
    }
}
