//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `BELAY_QUEUE_HOST`: task queue broker host (default: 127.0.0.1)
//! - `BELAY_QUEUE_PORT`: task queue broker port (default: 5672)
//! - `BELAY_QUEUE_USER`: broker user (default: guest)
//! - `BELAY_QUEUE_PASSWORD`: broker password (default: guest)
//! - `BELAY_QUEUE_VHOST`: broker virtual host (default: /)
//! - `BELAY_TASK_QUEUE_NAME`: durable queue to consume (default: belay_tasks)
//! - `BELAY_QUEUE_PREFETCH`: unacknowledged deliveries per consumer (default: 1)
//! - `BELAY_SYNC_ACTION_TIMEOUT_MS`: deadline for synchronous action
//!   execution (default: unset, meaning unbounded)
//!
//! The queue parameters are owned by the surrounding process; the core only
//! reads them here so the intake loop can be wired without a CLI surface.

use std::{env, sync::OnceLock, time::Duration};

use anyhow::{Context, Result};

/// Process-wide configuration cache.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Task queue connection parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub virtual_host: String,
    pub queue_name: String,
    /// One in-flight unacknowledged message per consumer keeps processing
    /// strictly sequential; raising this weakens the ordering contract.
    pub prefetch_count: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            queue_name: "belay_tasks".to_string(),
            prefetch_count: 1,
        }
    }
}

/// Core configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub queue: QueueConfig,

    /// Optional deadline for synchronous action execution. `None` preserves
    /// the unbounded behavior: an action that never returns blocks its
    /// consumer indefinitely.
    pub sync_action_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = QueueConfig::default();

        let queue = QueueConfig {
            host: env_or("BELAY_QUEUE_HOST", defaults.host),
            port: parsed_env("BELAY_QUEUE_PORT")?.unwrap_or(defaults.port),
            user: env_or("BELAY_QUEUE_USER", defaults.user),
            password: env_or("BELAY_QUEUE_PASSWORD", defaults.password),
            virtual_host: env_or("BELAY_QUEUE_VHOST", defaults.virtual_host),
            queue_name: env_or("BELAY_TASK_QUEUE_NAME", defaults.queue_name),
            prefetch_count: parsed_env("BELAY_QUEUE_PREFETCH")?
                .unwrap_or(defaults.prefetch_count),
        };

        let sync_action_timeout =
            parsed_env::<u64>("BELAY_SYNC_ACTION_TIMEOUT_MS")?.map(Duration::from_millis);

        Ok(Self {
            queue,
            sync_action_timeout,
        })
    }

    /// Global configuration, loaded once from the environment.
    pub fn global() -> Result<&'static Config> {
        if let Some(config) = CONFIG.get() {
            return Ok(config);
        }
        let config = Self::from_env()?;
        Ok(CONFIG.get_or_init(|| config))
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => {
            let value = raw
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw}"))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}
