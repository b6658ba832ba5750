//! Daemon configuration from `TURNSTILE_*` environment variables

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;
use turnstile_core::application::worker::constants::{
    DEFAULT_CANDIDATE_TARGET, DEFAULT_CAPACITY, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_CLEANUP_MAX_AGE_SECS, DEFAULT_PRIMARY_TIMEOUT, DEFAULT_QUEUE_NAME,
    DEFAULT_RESULT_RETENTION_DAYS, DEFAULT_TICK_INTERVAL, MAX_CAPACITY,
};

const DEFAULT_DB_PATH: &str = "~/.turnstile/results.db";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_RATE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format '{}' (expected json or pretty)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// None runs a single node on the in-process store
    pub redis_url: Option<String>,
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub queue_name: String,
    pub default_capacity: u32,
    pub tick_interval: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_max_age_secs: u64,
    pub result_retention_days: u32,
    /// None disables the primary path (fallback only)
    pub primary_endpoint: Option<String>,
    pub primary_timeout: Duration,
    pub candidate_target: usize,
    pub immediate_execution: bool,
    pub admin_token: Option<String>,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
    pub log_format: LogFormat,
    pub log_dir: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup: &lookup };

        let default_capacity = env.parse("TURNSTILE_DEFAULT_CAPACITY", DEFAULT_CAPACITY)?;
        if default_capacity == 0 || default_capacity > MAX_CAPACITY {
            bail!(
                "TURNSTILE_DEFAULT_CAPACITY must be between 1 and {} (got {})",
                MAX_CAPACITY,
                default_capacity
            );
        }
        let tick_ms: u64 = env.parse(
            "TURNSTILE_TICK_INTERVAL_MS",
            DEFAULT_TICK_INTERVAL.as_millis() as u64,
        )?;
        if tick_ms == 0 {
            bail!("TURNSTILE_TICK_INTERVAL_MS must be positive");
        }
        let cleanup_secs: u64 = env.parse(
            "TURNSTILE_CLEANUP_INTERVAL_SECS",
            DEFAULT_CLEANUP_INTERVAL.as_secs(),
        )?;
        if cleanup_secs == 0 {
            bail!("TURNSTILE_CLEANUP_INTERVAL_SECS must be positive");
        }
        let candidate_target: usize =
            env.parse("TURNSTILE_CANDIDATE_TARGET", DEFAULT_CANDIDATE_TARGET)?;
        if candidate_target == 0 {
            bail!("TURNSTILE_CANDIDATE_TARGET must be positive");
        }

        Ok(Self {
            redis_url: env.optional("TURNSTILE_REDIS_URL"),
            db_path: env
                .optional("TURNSTILE_DB_PATH")
                .unwrap_or_else(|| shellexpand::tilde(DEFAULT_DB_PATH).into_owned()),
            rpc_host: env
                .optional("TURNSTILE_RPC_HOST")
                .unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port: env.parse("TURNSTILE_RPC_PORT", DEFAULT_RPC_PORT)?,
            queue_name: env
                .optional("TURNSTILE_QUEUE_NAME")
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            default_capacity,
            tick_interval: Duration::from_millis(tick_ms),
            cleanup_interval: Duration::from_secs(cleanup_secs),
            cleanup_max_age_secs: env
                .parse("TURNSTILE_CLEANUP_MAX_AGE_SECS", DEFAULT_CLEANUP_MAX_AGE_SECS)?,
            result_retention_days: env
                .parse("TURNSTILE_RESULT_RETENTION_DAYS", DEFAULT_RESULT_RETENTION_DAYS)?,
            primary_endpoint: env.optional("TURNSTILE_PRIMARY_ENDPOINT"),
            primary_timeout: Duration::from_secs(env.parse(
                "TURNSTILE_PRIMARY_TIMEOUT_SECS",
                DEFAULT_PRIMARY_TIMEOUT.as_secs(),
            )?),
            candidate_target,
            immediate_execution: env.parse("TURNSTILE_IMMEDIATE_EXECUTION", false)?,
            admin_token: env.optional("TURNSTILE_ADMIN_TOKEN"),
            rate_limit_burst: env.parse("TURNSTILE_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?,
            rate_limit_rate: env.parse("TURNSTILE_RATE_LIMIT_RATE", DEFAULT_RATE_LIMIT_RATE)?,
            log_format: env.parse("TURNSTILE_LOG_FORMAT", LogFormat::Pretty)?,
            log_dir: env.optional("TURNSTILE_LOG_DIR"),
        })
    }

    /// sqlx connection URL for `db_path`
    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and non-blank
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| anyhow::anyhow!("{}", e))
                .with_context(|| format!("invalid value '{}' for {}", raw, key)),
        }
    }
}
