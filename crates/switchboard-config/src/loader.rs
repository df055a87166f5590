use std::path::Path;

use anyhow::Context as _;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result. Relative directories are
    /// resolved against the config file's location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut config = Self::parse(&raw)?;

        if let Some(base) = path.parent() {
            if config.credentials_dir.is_relative() {
                config.credentials_dir = base.join(&config.credentials_dir);
            }
            if config.keys_dir.is_relative() {
                config.keys_dir = base.join(&config.keys_dir);
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw).context("config variable expansion failed")?;

        let config: Self = toml::from_str(&expanded).context("failed to parse config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if the default provider is blank, a media limit is
    /// zero, or the sampling rate is out of range
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_provider.trim().is_empty() {
            anyhow::bail!("default_provider must not be empty");
        }

        if self.media.fetch_timeout_secs == 0 {
            anyhow::bail!("media.fetch_timeout_secs must be greater than 0");
        }

        if self.media.max_bytes == 0 {
            anyhow::bail!("media.max_bytes must be greater than 0");
        }

        if let Some(tracing) = self.telemetry.as_ref().and_then(|t| t.tracing.as_ref())
            && !(0.0..=1.0).contains(&tracing.sampling_rate)
        {
            anyhow::bail!("telemetry.tracing.sampling_rate must be between 0.0 and 1.0");
        }

        Ok(())
    }
}
