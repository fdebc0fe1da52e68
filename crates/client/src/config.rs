//! Client endpoint configuration

use std::time::Duration;

use taskdeck_protocol::{TASKS_PATH, TASK_ACTION_PATH};
use url::Url;

use crate::error::Result;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:4242";
const DEFAULT_PUSH_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Where the dashboard finds its server.
///
/// `base_url` is the HTTP origin; WebSocket endpoints are derived from it by
/// swapping the scheme.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Ceiling for the task-list reconnect backoff
    pub push_backoff_max: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            push_backoff_max: DEFAULT_PUSH_BACKOFF_MAX,
        })
    }

    pub fn with_push_backoff_max(mut self, max: Duration) -> Self {
        self.push_backoff_max = max;
        self
    }

    pub fn tasks_url(&self) -> Result<Url> {
        Ok(self.ws_base().join(TASKS_PATH)?)
    }

    pub fn action_url(&self) -> Result<Url> {
        Ok(self.base_url.join(TASK_ACTION_PATH)?)
    }

    /// Base URL with `ws`/`wss` in place of `http`/`https`.
    pub fn ws_base(&self) -> Url {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // Only fails for non-special schemes, where the original is kept.
        let _ = url.set_scheme(scheme);
        url
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_SERVER_URL).expect("default server URL is valid"),
            push_backoff_max: DEFAULT_PUSH_BACKOFF_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_endpoints_from_http_origin() {
        let config = ClientConfig::new("http://localhost:4242").unwrap();
        assert_eq!(config.tasks_url().unwrap().as_str(), "ws://localhost:4242/tasks");
        assert_eq!(
            config.action_url().unwrap().as_str(),
            "http://localhost:4242/task-action"
        );
    }

    #[test]
    fn https_maps_to_wss() {
        let config = ClientConfig::new("https://deck.example.com").unwrap();
        assert_eq!(config.ws_base().scheme(), "wss");
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(ClientConfig::new("not a url").is_err());
    }

    #[test]
    fn default_points_at_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:4242/");
    }
}
