#![allow(clippy::must_use_candidate)]

pub mod credentials;
mod env;
pub mod environment;
mod loader;
pub mod media;
pub mod telemetry;

use std::path::PathBuf;

use serde::Deserialize;

pub use credentials::*;
pub use environment::Environment;
pub use media::MediaConfig;
pub use telemetry::TelemetryConfig;

/// Provider used when a request does not name one
pub const DEFAULT_PROVIDER: &str = "bedrock";

/// Top-level gateway configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one `<provider>.yaml` credential file per vendor
    pub credentials_dir: PathBuf,
    /// Directory holding the credential keypair
    pub keys_dir: PathBuf,
    /// Environment override; falls back to `SWITCHBOARD_ENV` when unset
    #[serde(default)]
    pub environment: Option<String>,
    /// Provider used when a request omits one
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Media fetching for multimodal message parts
    #[serde(default)]
    pub media: MediaConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

impl Config {
    /// Environment selected by config, or by `SWITCHBOARD_ENV` when the config is silent
    pub fn environment(&self) -> Environment {
        self.environment
            .as_deref()
            .map_or_else(Environment::from_env, Environment::parse)
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_owned()
}
