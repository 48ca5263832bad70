//! Client configuration
//!
//! Connection options with the defaults used by the production service.
//! The transport spec endpoint is derived from `url` and `pathname` with
//! exactly one separating slash between segments.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base URL of the service
pub const DEFAULT_URL: &str = "http://www.treesmovienight.com";

/// Default socket mount path
pub const DEFAULT_PATHNAME: &str = "/socket";

/// Default maximum number of handshake retries
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay between handshake retries in milliseconds
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1000;

/// Client connection options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base HTTP URL of the service
    pub url: String,

    /// Path the socket is mounted on
    pub pathname: String,

    /// Username sent with `user.authenticate`
    pub username: String,

    /// Password sent with `user.authenticate`
    pub password: String,

    /// Maximum number of `ready` handshake retries before abandoning
    pub max_retries: u32,

    /// Fixed delay between handshake retries in milliseconds
    pub retry_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            pathname: DEFAULT_PATHNAME.to_string(),
            username: String::new(),
            password: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Create a config with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the socket mount path
    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = pathname.into();
        self
    }

    /// Set the credentials used for authentication
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the maximum number of handshake retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between handshake retries
    pub fn with_retry_timeout_ms(mut self, retry_timeout_ms: u64) -> Self {
        self.retry_timeout_ms = retry_timeout_ms;
        self
    }

    /// Delay between handshake retries as a `Duration`
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// URL of the transport spec endpoint: `<url>/<pathname>/spec`
    ///
    /// Joins the base URL and the mount path with exactly one slash
    /// regardless of how either side is written.
    pub fn spec_url(&self) -> String {
        let mut url = self.url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(self.pathname.strip_prefix('/').unwrap_or(&self.pathname));
        url.push_str("/spec");
        url
    }
}
