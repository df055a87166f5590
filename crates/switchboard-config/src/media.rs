use std::time::Duration;

use serde::Deserialize;

/// Remote media fetching for message parts
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    /// Timeout for downloading a single media URL, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Largest media body accepted from a remote URL, in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl MediaConfig {
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
        }
    }
}

const fn default_fetch_timeout() -> u64 {
    30
}

const fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}
