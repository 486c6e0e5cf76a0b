//! Configuration for the courier.

use crate::dispatcher::{DispatchConfig, DEFAULT_POLL_TIMEOUT};
use crate::error::{CourierError, CourierResult};
use crate::gateway::{PRODUCTION_GATEWAY, SANDBOX_GATEWAY};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use std::path::PathBuf;
use std::time::Duration;

/// Courier configuration.
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Path to the SQLite database holding applications and notifications
    pub database_path: PathBuf,

    /// Sandbox gateway address (host:port)
    pub sandbox_gateway: String,

    /// Production gateway address (host:port)
    pub production_gateway: String,

    /// Silence after a batch that counts as delivery
    pub poll_timeout: Duration,

    /// Timeout for opening a gateway connection
    pub connect_timeout: Duration,

    /// Pause between dispatch passes in loop mode
    pub dispatch_interval: Duration,

    /// Fresh connections allowed per call after an error frame
    pub reconnect_attempts: u32,

    /// Exclude notifications whose last result is terminal
    pub skip_terminal_failures: bool,
}

impl CourierConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// The result is not validated; apply any overrides, then call
    /// [`CourierConfig::validate`].
    pub fn from_env() -> CourierResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> CourierResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = match lookup("APNS_COURIER_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };

        let parse_u64 = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        let skip_terminal_failures = lookup("APNS_SKIP_TERMINAL_FAILURES")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.skip_terminal_failures);

        Ok(Self {
            database_path,
            sandbox_gateway: lookup("APNS_SANDBOX_GATEWAY").unwrap_or(defaults.sandbox_gateway),
            production_gateway: lookup("APNS_PRODUCTION_GATEWAY")
                .unwrap_or(defaults.production_gateway),
            poll_timeout: Duration::from_millis(parse_u64(
                "APNS_POLL_TIMEOUT_MS",
                defaults.poll_timeout.as_millis() as u64,
            )),
            connect_timeout: Duration::from_millis(parse_u64(
                "APNS_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )),
            dispatch_interval: Duration::from_secs(parse_u64(
                "APNS_DISPATCH_INTERVAL_SECS",
                defaults.dispatch_interval.as_secs(),
            )),
            reconnect_attempts: lookup("APNS_RECONNECT_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.reconnect_attempts),
            skip_terminal_failures,
        })
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> CourierResult<()> {
        if self.poll_timeout.is_zero() {
            return Err(CourierError::Config(
                "Poll timeout must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(CourierError::Config(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.sandbox_gateway.trim().is_empty() || self.production_gateway.trim().is_empty() {
            return Err(CourierError::Config(
                "Gateway addresses must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            poll_timeout: self.poll_timeout,
            reconnect_attempts: self.reconnect_attempts,
            skip_terminal_failures: self.skip_terminal_failures,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path()
                .unwrap_or_else(|_| PathBuf::from("courier.db")),
            sandbox_gateway: SANDBOX_GATEWAY.to_string(),
            production_gateway: PRODUCTION_GATEWAY.to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            dispatch_interval: Duration::from_secs(30),
            reconnect_attempts: 0,
            skip_terminal_failures: false,
        }
    }
}

/// `~/.apns-courier/courier.db`
fn default_database_path() -> CourierResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CourierError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".apns-courier").join("courier.db"))
}
