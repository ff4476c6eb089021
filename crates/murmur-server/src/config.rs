//! Relay configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a single relay can start with
//! zero configuration for local development (in-memory sessions, in-process
//! backplane).

use std::net::SocketAddr;
use std::time::Duration;

use murmur_shared::constants::{DEFAULT_APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_SESSION_TTL_SECS};

/// Secret used when `JWT_SECRET` is unset. Development only.
const DEV_JWT_SECRET: &str = "murmur-dev-secret";

/// Relay configuration.
#[derive(Clone)]
pub struct RelayConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:7743`
    pub http_addr: SocketAddr,

    /// Name reported by `/info` and used in logs.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// App identifier stored on every session.
    /// Env: `APP_NAME`
    /// Default: `murmurChat`
    pub app_name: String,

    /// HS256 secret shared with the token issuer.
    /// Env: `JWT_SECRET`
    pub jwt_secret: String,

    /// Redis connection string. When unset, sessions stay in memory and
    /// dispatches never leave this process.
    /// Env: `REDIS_URL`
    pub redis_url: Option<String>,

    /// Namespace prepended to every Redis key and channel.
    /// Env: `REDIS_KEY_PREFIX`
    /// Default: `websocket-service:`
    pub redis_key_prefix: String,

    /// Sliding session lifetime.
    /// Env: `SESSION_TTL_SECS`
    /// Default: 1800
    pub session_ttl: Duration,

    /// Base URL of the users service.
    /// Env: `USERS_SERVICE_URL`
    pub users_service_url: String,

    /// Base URL of the messages service.
    /// Env: `MESSAGES_SERVICE_URL`
    pub messages_service_url: String,

    /// Per-request timeout for collaborator calls.
    /// Env: `COLLABORATOR_TIMEOUT_MS`
    /// Default: 5000
    pub collaborator_timeout: Duration,

    /// How often the in-memory store drops expired entries.
    /// Env: `STORE_PURGE_INTERVAL_SECS`
    /// Default: 60
    pub store_purge_interval: Duration,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("http_addr", &self.http_addr)
            .field("instance_name", &self.instance_name)
            .field("app_name", &self.app_name)
            .field("jwt_secret", &"<redacted>")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("redis_key_prefix", &self.redis_key_prefix)
            .field("session_ttl", &self.session_ttl)
            .field("users_service_url", &self.users_service_url)
            .field("messages_service_url", &self.messages_service_url)
            .field("collaborator_timeout", &self.collaborator_timeout)
            .field("store_purge_interval", &self.store_purge_interval)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "murmur-relay".to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            redis_url: None,
            redis_key_prefix: "websocket-service:".to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            users_service_url: "http://localhost:7771/v1".to_string(),
            messages_service_url: "http://localhost:7772/v1".to_string(),
            collaborator_timeout: Duration::from_millis(5000),
            store_purge_interval: Duration::from_secs(60),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(name) = lookup("APP_NAME") {
            config.app_name = name;
        }

        match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using development secret"),
        }

        if let Some(url) = lookup("REDIS_URL") {
            if !url.is_empty() {
                config.redis_url = Some(url);
            }
        }

        if let Some(prefix) = lookup("REDIS_KEY_PREFIX") {
            config.redis_key_prefix = prefix;
        }

        if let Some(secs) = parse_number(&lookup, "SESSION_TTL_SECS") {
            config.session_ttl = Duration::from_secs(secs);
        }

        if let Some(url) = lookup("USERS_SERVICE_URL") {
            config.users_service_url = trim_base_url(&url);
        }

        if let Some(url) = lookup("MESSAGES_SERVICE_URL") {
            config.messages_service_url = trim_base_url(&url);
        }

        if let Some(ms) = parse_number(&lookup, "COLLABORATOR_TIMEOUT_MS") {
            config.collaborator_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_number(&lookup, "STORE_PURGE_INTERVAL_SECS") {
            config.store_purge_interval = Duration::from_secs(secs.max(1));
        }

        config
    }

    /// Backplane channel every relay of the fleet subscribes to.
    pub fn dispatch_channel(&self) -> String {
        format!("{}relay:dispatch", self.redis_key_prefix)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(value = %raw, variable = name, "Invalid number, using default");
            None
        }
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 7743).into());
        assert_eq!(config.app_name, "murmurChat");
        assert_eq!(config.session_ttl, Duration::from_secs(1800));
        assert!(config.redis_url.is_none());
        assert_eq!(config.dispatch_channel(), "websocket-service:relay:dispatch");
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("REDIS_URL", "redis://cache:6379"),
            ("REDIS_KEY_PREFIX", "ws:"),
            ("SESSION_TTL_SECS", "600"),
            ("USERS_SERVICE_URL", "http://users/v1/"),
            ("JWT_SECRET", "s3cret"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.dispatch_channel(), "ws:relay:dispatch");
        assert_eq!(config.session_ttl, Duration::from_secs(600));
        assert_eq!(config.users_service_url, "http://users/v1");
        assert_eq!(config.jwt_secret, "s3cret");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("SESSION_TTL_SECS", "soon"),
            ("COLLABORATOR_TIMEOUT_MS", "0"),
            ("REDIS_URL", ""),
        ]));

        assert_eq!(config.http_addr, RelayConfig::default().http_addr);
        assert_eq!(config.session_ttl, Duration::from_secs(1800));
        assert_eq!(config.collaborator_timeout, Duration::from_millis(5000));
        assert!(config.redis_url.is_none());
    }
}
