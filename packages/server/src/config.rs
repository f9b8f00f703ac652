use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::kernel::jobs::StalePolicy;

/// Ceiling for the stale threshold and the enqueue cooldown.
pub const MAX_QUEUE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Queue tuning shared by the enqueue path, the claimer and the reaper.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Heartbeat silence after which a processing job is stale.
    pub stale_threshold: Duration,
    pub max_claim_batch: usize,
    pub stale_policy: StalePolicy,
    /// Window in which an in-flight job for the same brand and url is reused.
    pub enqueue_cooldown: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(600),
            max_claim_batch: 5,
            stale_policy: StalePolicy::default(),
            enqueue_cooldown: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Load queue settings, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let stale_threshold = Duration::from_secs(env_or(
            "STALE_THRESHOLD_SECONDS",
            defaults.stale_threshold.as_secs(),
        )?);
        let max_claim_batch = env_or("MAX_CLAIM_BATCH", defaults.max_claim_batch)?;
        let max_retries: i32 = env_or("MAX_RETRIES", 2)?;
        let enqueue_cooldown = Duration::from_secs(env_or(
            "ENQUEUE_COOLDOWN_SECONDS",
            defaults.enqueue_cooldown.as_secs(),
        )?);

        let policy = env::var("STALE_POLICY").unwrap_or_else(|_| "requeue".to_string());
        let stale_policy = parse_stale_policy(&policy, max_retries)?;

        let config = Self {
            stale_threshold,
            max_claim_batch,
            stale_policy,
            enqueue_cooldown,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stale_threshold.is_zero() {
            bail!("STALE_THRESHOLD_SECONDS must be greater than zero");
        }
        if self.stale_threshold > MAX_QUEUE_WINDOW {
            bail!(
                "STALE_THRESHOLD_SECONDS must be at most {}",
                MAX_QUEUE_WINDOW.as_secs()
            );
        }
        if self.enqueue_cooldown > MAX_QUEUE_WINDOW {
            bail!(
                "ENQUEUE_COOLDOWN_SECONDS must be at most {}",
                MAX_QUEUE_WINDOW.as_secs()
            );
        }
        if self.max_claim_batch == 0 {
            bail!("MAX_CLAIM_BATCH must be greater than zero");
        }
        Ok(())
    }
}

/// `DATABASE_URL` alone, for commands that only read the store.
pub fn database_url_from_env() -> Result<String> {
    let _ = dotenv();
    env::var("DATABASE_URL").context("DATABASE_URL must be set")
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Required by the HTTP server, not by the CLI.
    pub cron_secret: Option<String>,
    pub extraction_service_url: String,
    pub extraction_timeout: Duration,
    pub in_process_scheduler: bool,
    pub tick_cron: String,
    pub worker_id: String,
    pub queue: QueueConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: database_url_from_env()?,
            port: env_or("PORT", 8080)?,
            cron_secret: env::var("CRON_SECRET").ok().filter(|s| !s.is_empty()),
            extraction_service_url: env::var("EXTRACTION_SERVICE_URL")
                .context("EXTRACTION_SERVICE_URL must be set")?,
            extraction_timeout: Duration::from_secs(env_or("EXTRACTION_TIMEOUT_SECONDS", 300)?),
            in_process_scheduler: env_or("IN_PROCESS_SCHEDULER", false)?,
            tick_cron: env::var("TICK_CRON").unwrap_or_else(|_| "0 * * * * *".to_string()),
            worker_id: env::var("WORKER_ID")
                .unwrap_or_else(|_| format!("worker-{}", Uuid::new_v4())),
            queue: QueueConfig::from_env()?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

/// `requeue` (bounded by `max_retries`) or `fail`.
pub fn parse_stale_policy(raw: &str, max_retries: i32) -> Result<StalePolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "requeue" | "retry" => Ok(StalePolicy::Requeue { max_retries }),
        "fail" => Ok(StalePolicy::Fail),
        other => bail!("STALE_POLICY must be 'requeue' or 'fail', got '{other}'"),
    }
}
