//! Client configuration.

use std::time::Duration;

use natter_shared::constants::{DEFAULT_HTTP_PORT, SOCKET_PATH};

/// When the client re-fetches the sidebar to correct its unseen counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Only when the sidebar is fetched explicitly.
    #[default]
    OnSidebarFetch,
    /// Additionally whenever the last resync is older than the interval.
    Every(Duration),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:5000`.
    pub base_url: String,
    pub resync: ResyncPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            resync: ResyncPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    /// Absolute URL of a REST path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// WebSocket URL derived from the base URL (`http` -> `ws`, `https` -> `wss`).
    pub fn socket_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}{SOCKET_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_base() {
        assert_eq!(
            ClientConfig::new("http://localhost:5000/").socket_url(),
            "ws://localhost:5000/ws"
        );
        assert_eq!(
            ClientConfig::new("https://chat.example.com").socket_url(),
            "wss://chat.example.com/ws"
        );
    }

    #[test]
    fn test_endpoint_join() {
        let config = ClientConfig::new("http://localhost:5000/");
        assert_eq!(
            config.endpoint("/api/messages/users"),
            "http://localhost:5000/api/messages/users"
        );
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(ClientConfig::default().resync, ResyncPolicy::OnSidebarFetch);
    }
}
