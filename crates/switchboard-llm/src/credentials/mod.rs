//! Credential resolution: load, filter, select, decrypt
//!
//! Every call re-reads the provider's credential file so edits take effect
//! without a restart. Nothing is cached, and decrypted secrets only live in
//! the returned value.

pub mod selector;

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use switchboard_config::{Credential, CredentialSet, credential_path, parse_credential_set};
use switchboard_keys::KeyManager;

use self::selector::SelectError;
use crate::LlmError;

/// Directory of per-provider credential files
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse `<root>/<provider>.yaml`
    pub async fn load<S: DeserializeOwned>(&self, provider: &str) -> Result<CredentialSet<S>, LlmError> {
        let path = credential_path(&self.root, provider);

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LlmError::ConfigNotFound {
                provider: provider.to_owned(),
                path: path.clone(),
            },
            _ => LlmError::ConfigUnreadable {
                provider: provider.to_owned(),
                path: path.clone(),
                source: e,
            },
        })?;

        parse_credential_set(&raw).map_err(|e| LlmError::ConfigParse {
            provider: provider.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Decrypts the secret fields of one selected credential
pub struct Unsealer<'a> {
    keys: &'a dyn KeyManager,
    credential: &'a str,
}

impl<'a> Unsealer<'a> {
    pub fn new(keys: &'a dyn KeyManager, credential: &'a str) -> Self {
        Self { keys, credential }
    }

    /// Decrypt a required secret field
    pub fn open(&self, field: &'static str, ciphertext: &str) -> Result<SecretString, LlmError> {
        self.keys.decrypt(ciphertext).map_err(|source| LlmError::Decryption {
            credential: self.credential.to_owned(),
            field,
            source,
        })
    }

    /// Decrypt an optional secret field; blank values stay absent
    pub fn open_optional(&self, field: &'static str, ciphertext: Option<&str>) -> Result<Option<SecretString>, LlmError> {
        match ciphertext.map(str::trim) {
            None | Some("") => Ok(None),
            Some(ciphertext) => self.open(field, ciphertext).map(Some),
        }
    }
}

/// Which credential list to resolve from
#[derive(Debug, Clone, Copy)]
pub struct CredentialScope<'a> {
    pub provider: &'a str,
    pub environment: &'a str,
    /// Requested model, checked against the credential's allowlist
    pub model: &'a str,
}

/// Resolve one decrypted credential for `scope`
///
/// Loads the credential file, keeps enabled entries, picks one by weight and
/// hands its vendor fields to `unseal` for decryption. Disabled-only lists fail
/// before any decryption is attempted.
pub async fn resolve_credential<S, T, F>(
    store: &CredentialStore,
    keys: &dyn KeyManager,
    scope: CredentialScope<'_>,
    unseal: F,
) -> Result<Credential<T>, LlmError>
where
    S: DeserializeOwned + Send,
    F: FnOnce(S, &Unsealer<'_>) -> Result<T, LlmError>,
{
    let CredentialScope {
        provider,
        environment,
        model,
    } = scope;

    let set = store.load::<S>(provider).await?;

    let mut enabled: Vec<Credential<S>> = set
        .into_environment(environment)
        .ok_or_else(|| LlmError::EnvironmentNotFound {
            provider: provider.to_owned(),
            environment: environment.to_owned(),
        })?
        .into_iter()
        .filter(|credential| credential.enabled)
        .collect();

    let index = selector::select_index(&enabled, &mut rand::rng()).map_err(|e| match e {
        SelectError::NoCandidates => LlmError::NoEnabledCredentials {
            provider: provider.to_owned(),
            environment: environment.to_owned(),
        },
        SelectError::ZeroTotalWeight => LlmError::InvalidWeightConfiguration {
            provider: provider.to_owned(),
            environment: environment.to_owned(),
        },
    })?;

    let candidates = enabled.len();
    let chosen = enabled.swap_remove(index);
    drop(enabled);

    tracing::debug!(provider, environment, credential = %chosen.name, candidates, "selected credential");

    if !chosen.serves_model(model) {
        tracing::warn!(
            provider,
            credential = %chosen.name,
            model,
            "model is not in the credential's allowlist"
        );
    }

    let name = chosen.name.clone();
    let unsealer = Unsealer::new(keys, &name);

    chosen.try_map_secrets(|secrets| unseal(secrets, &unsealer))
}
