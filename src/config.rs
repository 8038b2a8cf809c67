use std::env;
use std::time::Duration;

use crate::error::AppError;

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
    pub event_buffer_size: usize,
    pub dispatch: DispatchSettings,
}

/// What happens to couriers who rejected or let an offer time out once the
/// payout is surged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedCourierPolicy {
    /// Cooldown and reject-count exclusions only apply while surge is 1.0.
    ReincludeUnderSurge,
    /// Exclusions apply on every attempt.
    AlwaysExclude,
}

impl std::str::FromStr for RejectedCourierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reinclude_under_surge" => Ok(Self::ReincludeUnderSurge),
            "always_exclude" => Ok(Self::AlwaysExclude),
            other => Err(format!(
                "unknown policy {other}, expected reinclude_under_surge/always_exclude"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub initial_radius_km: f64,
    pub max_radius_km: f64,
    pub radius_step_km: f64,
    pub max_attempts: u32,
    pub candidate_limit: usize,
    pub shortlist_size: usize,
    pub guard_ttl: Duration,
    pub courier_busy_ttl: Duration,
    pub order_lock_ttl: Duration,
    pub offer_timeout: Duration,
    pub empty_retry_delay: Duration,
    pub contention_retry_delay: Duration,
    pub shortlist_busy_retry_delay: Duration,
    pub reject_cooldown: Duration,
    pub reject_count_ttl: Duration,
    pub max_rejects: i64,
    pub average_speed_kmh: f64,
    pub max_surge: f64,
    pub surge_step: f64,
    pub rejected_policy: RejectedCourierPolicy,
    /// How often a courier response retries the order lock before giving up.
    pub response_lock_attempts: u32,
    pub response_lock_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            initial_radius_km: 3.0,
            max_radius_km: 12.0,
            radius_step_km: 3.0,
            max_attempts: 8,
            candidate_limit: 30,
            shortlist_size: 3,
            guard_ttl: Duration::from_secs(180),
            courier_busy_ttl: Duration::from_secs(45 * 60),
            order_lock_ttl: Duration::from_secs(10),
            offer_timeout: Duration::from_secs(15),
            empty_retry_delay: Duration::from_secs(5),
            contention_retry_delay: Duration::from_secs(1),
            shortlist_busy_retry_delay: Duration::from_secs(2),
            reject_cooldown: Duration::from_secs(30),
            reject_count_ttl: Duration::from_secs(60 * 60),
            max_rejects: 2,
            average_speed_kmh: 30.0,
            max_surge: 1.3,
            surge_step: 0.1,
            rejected_policy: RejectedCourierPolicy::ReincludeUnderSurge,
            response_lock_attempts: 20,
            response_lock_backoff: Duration::from_millis(25),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch: DispatchSettings::from_env()?,
        })
    }
}

impl DispatchSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let settings = Self {
            initial_radius_km: parse_or_default(
                "DISPATCH_INITIAL_RADIUS_KM",
                defaults.initial_radius_km,
            )?,
            max_radius_km: parse_or_default("DISPATCH_MAX_RADIUS_KM", defaults.max_radius_km)?,
            radius_step_km: parse_or_default("DISPATCH_RADIUS_STEP_KM", defaults.radius_step_km)?,
            max_attempts: parse_or_default("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts)?,
            candidate_limit: parse_or_default("DISPATCH_CANDIDATE_LIMIT", defaults.candidate_limit)?,
            shortlist_size: parse_or_default("DISPATCH_SHORTLIST_SIZE", defaults.shortlist_size)?,
            guard_ttl: secs_or_default("DISPATCH_GUARD_TTL_SECS", defaults.guard_ttl)?,
            courier_busy_ttl: secs_or_default(
                "DISPATCH_COURIER_BUSY_TTL_SECS",
                defaults.courier_busy_ttl,
            )?,
            order_lock_ttl: secs_or_default("DISPATCH_ORDER_LOCK_TTL_SECS", defaults.order_lock_ttl)?,
            offer_timeout: secs_or_default("DISPATCH_OFFER_TIMEOUT_SECS", defaults.offer_timeout)?,
            empty_retry_delay: secs_or_default(
                "DISPATCH_EMPTY_RETRY_SECS",
                defaults.empty_retry_delay,
            )?,
            contention_retry_delay: secs_or_default(
                "DISPATCH_CONTENTION_RETRY_SECS",
                defaults.contention_retry_delay,
            )?,
            shortlist_busy_retry_delay: secs_or_default(
                "DISPATCH_SHORTLIST_BUSY_RETRY_SECS",
                defaults.shortlist_busy_retry_delay,
            )?,
            reject_cooldown: secs_or_default(
                "DISPATCH_REJECT_COOLDOWN_SECS",
                defaults.reject_cooldown,
            )?,
            reject_count_ttl: defaults.reject_count_ttl,
            max_rejects: parse_or_default("DISPATCH_MAX_REJECTS", defaults.max_rejects)?,
            average_speed_kmh: parse_or_default(
                "DISPATCH_AVERAGE_SPEED_KMH",
                defaults.average_speed_kmh,
            )?,
            max_surge: parse_or_default("DISPATCH_MAX_SURGE", defaults.max_surge)?,
            surge_step: parse_or_default("DISPATCH_SURGE_STEP", defaults.surge_step)?,
            rejected_policy: parse_or_default("DISPATCH_REJECTED_POLICY", defaults.rejected_policy)?,
            response_lock_attempts: defaults.response_lock_attempts,
            response_lock_backoff: defaults.response_lock_backoff,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_attempts == 0 {
            return Err(AppError::Internal(
                "DISPATCH_MAX_ATTEMPTS must be > 0".to_string(),
            ));
        }
        if self.shortlist_size == 0 {
            return Err(AppError::Internal(
                "DISPATCH_SHORTLIST_SIZE must be > 0".to_string(),
            ));
        }
        if self.average_speed_kmh <= 0.0 {
            return Err(AppError::Internal(
                "DISPATCH_AVERAGE_SPEED_KMH must be > 0".to_string(),
            ));
        }
        if self.max_radius_km < self.initial_radius_km {
            return Err(AppError::Internal(format!(
                "DISPATCH_MAX_RADIUS_KM ({}) must be >= DISPATCH_INITIAL_RADIUS_KM ({})",
                self.max_radius_km, self.initial_radius_km
            )));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn secs_or_default(key: &str, default: Duration) -> Result<Duration, AppError> {
    parse_or_default(key, default.as_secs()).map(Duration::from_secs)
}
