//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use natter_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_TOKEN_TTL_SECS};

const DEV_JWT_SECRET: &str = "natter-dev-secret-do-not-use-in-production";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./natter.db`
    pub database_path: PathBuf,

    /// Directory where uploaded images are written.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./media`
    pub blob_storage_path: PathBuf,

    /// Externally reachable base URL, used to build public image URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:5000`
    pub public_base_url: String,

    /// HMAC secret for bearer tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development secret.
    pub jwt_secret: String,

    /// Lifetime of issued tokens in seconds.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 7 days
    pub token_ttl_secs: u64,

    /// Maximum size of a JSON request body (images travel inline).
    /// Env: `MAX_BODY_BYTES`
    /// Default: 4 MiB
    pub max_body_bytes: usize,

    /// Maximum decoded size of a single uploaded image.
    /// Env: `MAX_IMAGE_BYTES`
    /// Default: 4 MiB
    pub max_image_bytes: usize,

    /// Per-connection queue of pending pushes. Pushes beyond this are dropped.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `256`
    pub outbound_buffer: usize,

    /// Require the socket handshake to carry a valid token for its user id.
    /// Env: `SOCKET_TOKEN_REQUIRED` (true/false)
    /// Default: `false`
    pub socket_token_required: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("blob_storage_path", &self.blob_storage_path)
            .field("public_base_url", &self.public_base_url)
            .field("jwt_secret", &"[redacted]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("socket_token_required", &self.socket_token_required)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./natter.db"),
            blob_storage_path: PathBuf::from("./media"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            max_body_bytes: 4 * 1024 * 1024,
            max_image_bytes: 4 * 1024 * 1024,
            outbound_buffer: 256,
            socket_token_required: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using development secret"),
        }

        parse_into(&lookup, "TOKEN_TTL_SECS", &mut config.token_ttl_secs);
        parse_into(&lookup, "MAX_BODY_BYTES", &mut config.max_body_bytes);
        parse_into(&lookup, "MAX_IMAGE_BYTES", &mut config.max_image_bytes);
        parse_into(&lookup, "OUTBOUND_BUFFER", &mut config.outbound_buffer);
        if config.outbound_buffer == 0 {
            tracing::warn!("OUTBOUND_BUFFER must be positive, using 1");
            config.outbound_buffer = 1;
        }

        if let Some(val) = lookup("SOCKET_TOKEN_REQUIRED") {
            config.socket_token_required = val == "true" || val == "1";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid number, using default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.token_ttl_secs, 7 * 24 * 60 * 60);
        assert!(!config.socket_token_required);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("PUBLIC_BASE_URL", "https://chat.example.com/"),
            ("OUTBOUND_BUFFER", "8"),
            ("SOCKET_TOKEN_REQUIRED", "true"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.public_base_url, "https://chat.example.com");
        assert_eq!(config.outbound_buffer, 8);
        assert!(config.socket_token_required);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("HTTP_ADDR", "nope"), ("MAX_BODY_BYTES", "lots")]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = from_pairs(&[("JWT_SECRET", "super-secret-value")]);
        assert!(!format!("{config:?}").contains("super-secret-value"));
    }
}
