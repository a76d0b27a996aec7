//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Default upper bound on a single bot round trip
const DEFAULT_BOT_TIMEOUT_MS: u64 = 1000;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS; any origin when unset
    pub client_origin: Option<String>,
    /// How long a bot gets to answer each poll
    pub bot_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let bot_timeout_ms = match lookup("BOT_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidNumber("BOT_TIMEOUT_MS"))?,
            None => DEFAULT_BOT_TIMEOUT_MS,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.is_empty()),

            bot_timeout: Duration::from_millis(bot_timeout_ms),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Environment variable {0} must be a positive integer")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.client_origin, None);
        assert_eq!(config.bot_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_port_wins_over_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:7000")]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());

        let config = load(&[("SERVER_ADDR", "127.0.0.1:7000")]).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
        assert!(matches!(
            load(&[("BOT_TIMEOUT_MS", "soon")]),
            Err(ConfigError::InvalidNumber("BOT_TIMEOUT_MS"))
        ));
        assert!(matches!(
            load(&[("BOT_TIMEOUT_MS", "0")]),
            Err(ConfigError::InvalidNumber("BOT_TIMEOUT_MS"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BOT_TIMEOUT_MS", "250"),
            ("CLIENT_ORIGIN", "http://localhost:3000"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(config.bot_timeout, Duration::from_millis(250));
        assert_eq!(config.client_origin.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.log_level, "debug");
    }
}
