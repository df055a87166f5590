//! Per-provider credential files
//!
//! Each provider has one YAML document at `<credentials_dir>/<provider>.yaml`:
//!
//! ```yaml
//! environments:
//!   production:
//!     credentials:
//!       - name: primary
//!         api_key: "<ciphertext>"
//!         enabled: true
//!         weight: 3
//!         models: ["gpt-4o"]
//!         timeout: 60
//!         proxy: "http://proxy.internal:3128"
//! ```
//!
//! Vendor-specific fields sit next to the common ones and are captured by the
//! `S` type parameter. Parsing is pure; nothing is retained between calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use crate::env::ExpandError;

/// Errors raised while parsing a credential file
#[derive(Debug, Error)]
pub enum CredentialFileError {
    #[error("credential variable expansion failed: {0}")]
    Expand(#[from] ExpandError),

    #[error("malformed credential file: {0}")]
    Parse(String),
}

/// Credentials for one provider, keyed by environment name
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "S: DeserializeOwned"))]
pub struct CredentialSet<S> {
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentCredentials<S>>,
}

/// Ordered credential list for a single environment
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "S: DeserializeOwned"))]
pub struct EnvironmentCredentials<S> {
    #[serde(default)]
    pub credentials: Vec<Credential<S>>,
}

/// A named, weighted, enable-able set of provider secrets and limits
#[derive(Debug, Clone, Deserialize)]
pub struct Credential<S> {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// Relative selection weight; zero makes the credential unreachable
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub qps_limit: u32,
    #[serde(default)]
    pub description: String,
    /// Models this credential is expected to serve
    #[serde(default)]
    pub models: Vec<String>,
    /// Transport timeout in seconds, 0 for none
    #[serde(default)]
    pub timeout: u64,
    /// Proxy URL all calls for this credential are routed through
    #[serde(default, deserialize_with = "empty_as_none")]
    pub proxy: Option<String>,
    /// Vendor-specific fields
    #[serde(flatten)]
    pub secrets: S,
}

impl<S> Credential<S> {
    pub const fn timeout(&self) -> Option<Duration> {
        match self.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Whether `model` is covered by the allowlist (an empty list allows everything)
    pub fn serves_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    /// Replace the vendor fields, keeping the common ones
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`
    pub fn try_map_secrets<T, E>(self, f: impl FnOnce(S) -> Result<T, E>) -> Result<Credential<T>, E> {
        Ok(Credential {
            secrets: f(self.secrets)?,
            name: self.name,
            enabled: self.enabled,
            weight: self.weight,
            qps_limit: self.qps_limit,
            description: self.description,
            models: self.models,
            timeout: self.timeout,
            proxy: self.proxy,
        })
    }
}

impl<S> CredentialSet<S> {
    /// Take the credential list for `environment`, if the file defines it
    pub fn into_environment(mut self, environment: &str) -> Option<Vec<Credential<S>>> {
        self.environments.remove(environment).map(|env| env.credentials)
    }
}

/// Location of a provider's credential file
pub fn credential_path(root: &Path, provider: &str) -> PathBuf {
    root.join(format!("{provider}.yaml"))
}

/// Parse a credential document after expanding `{{ env.VAR }}` placeholders
///
/// # Errors
///
/// Returns an error if placeholder expansion fails or the YAML does not match
/// the credential shape
pub fn parse_credential_set<S: DeserializeOwned>(raw: &str) -> Result<CredentialSet<S>, CredentialFileError> {
    let expanded = crate::env::expand_env(raw)?;

    serde_yaml::from_str(&expanded).map_err(|e| CredentialFileError::Parse(e.to_string()))
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
