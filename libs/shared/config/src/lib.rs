use std::env;
use tracing::warn;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_IDEMPOTENCY_TTL_MINUTES: i64 = 24 * 60;
const DEFAULT_LATE_CANCEL_WINDOW_HOURS: i64 = 24;

/// Cap for configured spans too large for chrono to represent.
fn max_configured_span() -> chrono::Duration {
    chrono::Duration::days(100 * 365)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub redis_url: Option<String>,
    pub idempotency_ttl_minutes: i64,
    /// Notice (in hours) below which a cancellation or deletion counts as late.
    /// Shared by the cancel and the delete path.
    pub late_cancel_window_hours: i64,
    /// JSON file with the clinic and service catalog loaded at startup.
    pub catalog_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            redis_url: None,
            idempotency_ttl_minutes: DEFAULT_IDEMPOTENCY_TTL_MINUTES,
            late_cancel_window_hours: DEFAULT_LATE_CANCEL_WINDOW_HOURS,
            catalog_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDRESS not set, using default");
                    DEFAULT_BIND_ADDRESS.to_string()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            idempotency_ttl_minutes: positive_i64_from_env(
                "IDEMPOTENCY_TTL_MINUTES",
                DEFAULT_IDEMPOTENCY_TTL_MINUTES,
            ),
            late_cancel_window_hours: positive_i64_from_env(
                "LATE_CANCEL_WINDOW_HOURS",
                DEFAULT_LATE_CANCEL_WINDOW_HOURS,
            ),
            catalog_path: env::var("CLINIC_CATALOG_PATH").ok().filter(|path| !path.trim().is_empty()),
        };

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, idempotency records will be kept in process memory");
        }
        if config.catalog_path.is_none() {
            warn!("CLINIC_CATALOG_PATH not set, starting with an empty clinic catalog");
        }

        config
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.idempotency_ttl_minutes).unwrap_or_else(max_configured_span)
    }

    pub fn late_cancel_window(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.late_cancel_window_hours).unwrap_or_else(max_configured_span)
    }
}

fn positive_i64_from_env(name: &str, default: i64) -> i64 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("{} has invalid value {:?}, using default {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
