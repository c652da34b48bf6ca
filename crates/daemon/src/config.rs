// Daemon configuration from environment variables

use anyhow::{anyhow, Context, Result};
use newsdesk_core::domain::Cadence;
use newsdesk_core::SchedulerConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.newsdesk/jobs.db";
const DEFAULT_WORKERS_PER_QUEUE: usize = 2;
const DEFAULT_CACHE_WARM_CADENCE: &str = "every 10 minutes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
    pub workers_per_queue: usize,
    pub cache_warm_cadence: Option<Cadence>,
    pub scheduler: SchedulerConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("NEWSDESK_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = shellexpand::tilde(&db_path).into_owned();

        let log_format = match lookup("NEWSDESK_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(anyhow!("NEWSDESK_LOG_FORMAT must be pretty or json, got {}", other)),
        };

        let log_dir = lookup("NEWSDESK_LOG_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()));

        let workers_per_queue = parse_or(&lookup, "NEWSDESK_WORKERS_PER_QUEUE", DEFAULT_WORKERS_PER_QUEUE)?;

        // Empty string disables the cadence
        let cache_warm_cadence = match lookup("NEWSDESK_CACHE_WARM_CADENCE") {
            Some(pattern) if pattern.trim().is_empty() => None,
            pattern => {
                let pattern = pattern.unwrap_or_else(|| DEFAULT_CACHE_WARM_CADENCE.to_string());
                Some(Cadence::parse(&pattern).context("NEWSDESK_CACHE_WARM_CADENCE")?)
            }
        };

        let mut scheduler = SchedulerConfig::default();
        if let Some(secs) = parse_opt::<u64, _>(&lookup, "NEWSDESK_SWEEP_INTERVAL_SECS")? {
            scheduler.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64, _>(&lookup, "NEWSDESK_SHUTDOWN_GRACE_SECS")? {
            scheduler.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64, _>(&lookup, "NEWSDESK_STALE_ACTIVE_SECS")? {
            scheduler.stale_active_after = (secs > 0).then(|| Duration::from_secs(secs));
        }
        scheduler.validate()?;

        Ok(Self {
            db_path,
            log_format,
            log_dir,
            workers_per_queue,
            cache_warm_cadence,
            scheduler,
        })
    }

    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("{} has invalid value {:?}: {}", key, raw, e))
        })
        .transpose()
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}
