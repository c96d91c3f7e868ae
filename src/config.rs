use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub nearby_window: Duration,
    pub total_window: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            retry_delay: Duration::from_secs(5),
            nearby_window: Duration::from_secs(30),
            total_window: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub dispatch_queue_size: usize,
    pub event_buffer_size: usize,
    pub dispatch_workers: usize,
    pub dispatch: DispatchPolicy,
    pub dispatch_seed: Option<u64>,
    pub store_lock_timeout: Duration,
    pub average_speed_kmh: f64,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            dispatch_queue_size: 1024,
            event_buffer_size: 1024,
            dispatch_workers: 4,
            dispatch: DispatchPolicy::default(),
            dispatch_seed: None,
            store_lock_timeout: Duration::from_millis(2000),
            average_speed_kmh: 40.0,
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )));
            }
        };

        let dispatch = DispatchPolicy {
            max_attempts: parse_or_default(
                "DISPATCH_MAX_ATTEMPTS",
                defaults.dispatch.max_attempts,
            )?,
            retry_delay: Duration::from_secs(parse_or_default(
                "DISPATCH_RETRY_DELAY_SECS",
                defaults.dispatch.retry_delay.as_secs(),
            )?),
            nearby_window: Duration::from_secs(parse_or_default(
                "DISPATCH_NEARBY_WINDOW_SECS",
                defaults.dispatch.nearby_window.as_secs(),
            )?),
            total_window: Duration::from_secs(parse_or_default(
                "DISPATCH_TOTAL_WINDOW_SECS",
                defaults.dispatch.total_window.as_secs(),
            )?),
        };

        if dispatch.max_attempts == 0 {
            return Err(AppError::Internal(
                "DISPATCH_MAX_ATTEMPTS must be > 0".to_string(),
            ));
        }

        let snapshot_interval = Duration::from_secs(parse_or_default(
            "SNAPSHOT_INTERVAL_SECS",
            defaults.snapshot_interval.as_secs(),
        )?);
        if snapshot_interval.is_zero() {
            return Err(AppError::Internal(
                "SNAPSHOT_INTERVAL_SECS must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            dispatch_workers: parse_or_default("DISPATCH_WORKERS", defaults.dispatch_workers)?
                .max(1),
            dispatch,
            dispatch_seed: parse_optional("DISPATCH_SEED")?,
            store_lock_timeout: Duration::from_millis(parse_or_default(
                "STORE_LOCK_TIMEOUT_MS",
                defaults.store_lock_timeout.as_millis() as u64,
            )?),
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
            snapshot_interval,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
