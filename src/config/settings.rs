//! Application settings loaded from config.toml
//!
//! Every section and key is optional; anything missing falls back to the
//! defaults below. `DATABASE_URL` from the environment (or `.env`) overrides
//! `[database] url`.

use crate::{
    core::{atomic::TransactionBounds, status::TransitionPolicy},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "ORDERING_CONFIG";
/// Configuration file used when [`CONFIG_PATH_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// The whole config.toml file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[database]`
    pub database: DatabaseSettings,
    /// `[ordering]`
    pub ordering: OrderingSettings,
    /// `[notifications]`
    pub notifications: NotificationSettings,
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// sea-orm connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://data/ordering.sqlite?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Order engine settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrderingSettings {
    /// Flat tax rate, written as a string such as `"0.10"`
    pub tax_rate: Decimal,
    /// Reject customer orders placed outside the branch radius
    pub enforce_order_radius: bool,
    /// Only allow `in_kitchen -> cooking -> completed`
    pub strict_transitions: bool,
    /// Longest wait for a connection when a transaction begins
    pub max_wait_ms: u64,
    /// Longest time a transaction may run
    pub timeout_ms: u64,
}

impl Default for OrderingSettings {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(10, 2),
            enforce_order_radius: false,
            strict_transitions: false,
            max_wait_ms: 10_000,
            timeout_ms: 10_000,
        }
    }
}

impl OrderingSettings {
    /// Transaction bounds for the order engine.
    #[must_use]
    pub const fn bounds(&self) -> TransactionBounds {
        TransactionBounds::from_millis(self.max_wait_ms, self.timeout_ms)
    }

    /// Status transition policy.
    #[must_use]
    pub const fn policy(&self) -> TransitionPolicy {
        if self.strict_transitions {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Permissive
        }
    }
}

/// Broadcast bus settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Events buffered per subscriber before it lags
    pub channel_capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Parses configuration from TOML text.
///
/// # Errors
/// Returns [`Error::Config`] for invalid TOML, unknown value types or a
/// negative tax rate.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse configuration: {e}"),
    })?;
    if config.ordering.tax_rate.is_sign_negative() {
        return Err(Error::Config {
            message: format!("tax_rate must not be negative, got {}", config.ordering.tax_rate),
        });
    }
    Ok(config)
}

/// Loads configuration from a TOML file. A missing file yields the defaults.
///
/// # Errors
/// Returns [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "No configuration file, using defaults");
        return Ok(AppConfig::default());
    }

    debug!(path = %path.display(), "Loading configuration");
    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path.display()),
    })?;
    parse_config(&contents)
}

/// Loads the application configuration the way the binary does: file from
/// `ORDERING_CONFIG` (default `config.toml`), then `DATABASE_URL` on top.
///
/// # Errors
/// Returns [`Error::Config`] if the file cannot be read or parsed.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config(&path)?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.ordering.tax_rate, dec!(0.10));
        assert_eq!(config.ordering.bounds(), TransactionBounds::default());
        assert_eq!(config.ordering.policy(), TransitionPolicy::Permissive);
        assert_eq!(config.notifications.channel_capacity, 1024);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
[database]
url = "sqlite::memory:"

[ordering]
tax_rate = "0.08"
strict_transitions = true
max_wait_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.ordering.tax_rate, dec!(0.08));
        assert_eq!(config.ordering.policy(), TransitionPolicy::Strict);
        assert_eq!(config.ordering.bounds(), TransactionBounds::from_millis(250, 10_000));
        assert!(!config.ordering.enforce_order_radius);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for source in [
            "[ordering]\ntax_rate = \"-0.1\"",
            "[ordering]\nmax_wait_ms = \"soon\"",
            "[database\nurl = 1",
        ] {
            assert!(
                matches!(parse_config(source), Err(Error::Config { .. })),
                "{source}"
            );
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("ordering-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[notifications]\nchannel_capacity = 8").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.notifications.channel_capacity, 8);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }
}
