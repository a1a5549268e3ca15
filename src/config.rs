use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub upstream: UpstreamSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub worker: WorkerSettings,
    pub scheduler: SchedulerSettings,
    pub inbox_path: PathBuf,
    pub archive_path: PathBuf,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Record fetch path; `{id}` is replaced with the record id.
    pub record_path: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: f64,
    pub recovery_threshold: f64,
    pub open_duration: Duration,
    pub sample_size: usize,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_cap: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub rate_limit_cooldown: Duration,
    pub attachment_pause: Duration,
    pub attachment_min_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub batch_size: i64,
    pub cycle_interval: Duration,
    pub intake_every_n_cycles: u64,
    pub lease_duration: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("SIPHON_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid SIPHON_HOST: {e}"))?;

        let port: u16 = env_parse("SIPHON_PORT", "3000")?;

        let upstream = UpstreamSettings {
            base_url: env_required("SIPHON_API_BASE_URL")?,
            record_path: env_or("SIPHON_API_RECORD_PATH", "/records/{id}"),
            api_token: std::env::var("SIPHON_API_TOKEN").ok(),
            timeout: env_secs("SIPHON_API_TIMEOUT_SECS", "30")?,
        };

        let breaker = BreakerSettings {
            failure_threshold: env_parse("SIPHON_FAILURE_THRESHOLD", "0.5")?,
            recovery_threshold: env_parse("SIPHON_RECOVERY_THRESHOLD", "0.3")?,
            open_duration: env_secs("SIPHON_OPEN_DURATION_SECS", "300")?,
            sample_size: env_parse("SIPHON_SAMPLE_SIZE", "10")?,
        };

        let retry = RetrySettings {
            max_attempts: env_parse("SIPHON_MAX_ATTEMPTS", "5")?,
            backoff_base: env_secs("SIPHON_BACKOFF_BASE_SECS", "300")?,
            backoff_multiplier: env_parse("SIPHON_BACKOFF_MULTIPLIER", "2.0")?,
            backoff_cap: env_secs("SIPHON_BACKOFF_CAP_SECS", "86400")?,
        };

        let worker = WorkerSettings {
            rate_limit_cooldown: env_secs("SIPHON_RATE_LIMIT_COOLDOWN_SECS", "60")?,
            attachment_pause: env_secs("SIPHON_ATTACHMENT_PAUSE_SECS", "0")?,
            attachment_min_bytes: env_parse("SIPHON_ATTACHMENT_MIN_BYTES", "1024")?,
        };

        let scheduler = SchedulerSettings {
            batch_size: env_parse("SIPHON_BATCH_SIZE", "10")?,
            cycle_interval: env_secs("SIPHON_CYCLE_INTERVAL_SECS", "300")?,
            intake_every_n_cycles: env_parse("SIPHON_INTAKE_EVERY_N_CYCLES", "3")?,
            lease_duration: env_secs("SIPHON_LEASE_SECS", "3600")?,
        };

        if scheduler.intake_every_n_cycles == 0 {
            return Err("SIPHON_INTAKE_EVERY_N_CYCLES must be at least 1".to_string());
        }

        let inbox_path = PathBuf::from(env_or("SIPHON_INBOX_PATH", "./inbox"));
        let archive_path = PathBuf::from(env_or("SIPHON_ARCHIVE_PATH", "./archive"));
        let log_level = env_or("SIPHON_LOG_LEVEL", "info");

        Ok(Config {
            database_url,
            host,
            port,
            upstream,
            breaker,
            retry,
            worker,
            scheduler,
            inbox_path,
            archive_path,
            log_level,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}

fn env_secs(key: &str, default: &str) -> Result<Duration, String> {
    Ok(Duration::from_secs(env_parse(key, default)?))
}
