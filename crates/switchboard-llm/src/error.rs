use std::path::PathBuf;

use switchboard_keys::KeyError;
use thiserror::Error;

/// Errors that can occur while dispatching a chat completion
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider has no credential file
    #[error("credential file for provider `{provider}` not found at {}", path.display())]
    ConfigNotFound { provider: String, path: PathBuf },

    /// Credential file exists but reading it failed
    #[error("credential file for provider `{provider}` at {} is unreadable: {source}", path.display())]
    ConfigUnreadable {
        provider: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Credential file was read but does not parse
    #[error("malformed credential file for provider `{provider}`: {reason}")]
    ConfigParse { provider: String, reason: String },

    /// Credential file has no entry for the active environment
    #[error("provider `{provider}` has no `{environment}` environment")]
    EnvironmentNotFound { provider: String, environment: String },

    /// Environment exists but every credential is disabled
    #[error("provider `{provider}` has no enabled credentials in `{environment}`")]
    NoEnabledCredentials { provider: String, environment: String },

    /// Every enabled credential has weight zero
    #[error("enabled credentials of provider `{provider}` in `{environment}` have a total weight of zero")]
    InvalidWeightConfiguration { provider: String, environment: String },

    /// A secret field could not be decrypted
    #[error("failed to decrypt `{field}` of credential `{credential}`: {source}")]
    Decryption {
        credential: String,
        field: &'static str,
        #[source]
        source: KeyError,
    },

    /// No vendor is registered under the requested name
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    /// Transport or SDK client could not be initialized
    #[error("failed to construct {provider} client: {reason}")]
    ClientConstruction { provider: String, reason: String },

    /// A remote media part could not be downloaded
    #[error("failed to fetch media {url}: {reason}")]
    MediaFetch { url: String, reason: String },

    /// Vendor call failed
    #[error("{provider} call failed: {message}")]
    ProviderCall {
        provider: String,
        /// HTTP status reported by the vendor, when there was one
        status: Option<u16>,
        message: String,
    },

    /// Stream ended abnormally
    #[error("stream terminated: {0}")]
    StreamTerminated(String),

    /// Request violates the canonical request invariants
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Caller cancelled the call
    #[error("request cancelled")]
    Cancelled,

    /// Streaming output could not be written
    #[error("failed to write stream output: {0}")]
    Output(#[from] std::io::Error),
}

impl LlmError {
    pub(crate) fn provider_call(provider: &str, message: impl Into<String>) -> Self {
        Self::ProviderCall {
            provider: provider.to_owned(),
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn provider_status(provider: &str, status: u16, message: impl Into<String>) -> Self {
        Self::ProviderCall {
            provider: provider.to_owned(),
            status: Some(status),
            message: message.into(),
        }
    }

    pub(crate) fn client_construction(provider: &str, reason: impl Into<String>) -> Self {
        Self::ClientConstruction {
            provider: provider.to_owned(),
            reason: reason.into(),
        }
    }

    /// Recast a failure raised after a stream opened as [`Self::StreamTerminated`]
    ///
    /// The vendor, status and message stay in the reason.
    #[must_use]
    pub fn into_stream_terminated(self) -> Self {
        match self {
            Self::StreamTerminated(_) | Self::Cancelled => self,
            Self::ProviderCall {
                provider,
                status: Some(status),
                message,
            } => Self::StreamTerminated(format!("{provider} stream failed with status {status}: {message}")),
            Self::ProviderCall {
                provider,
                status: None,
                message,
            } => Self::StreamTerminated(format!("{provider} stream failed: {message}")),
            other => Self::StreamTerminated(other.to_string()),
        }
    }

    /// Whether an external caller may reasonably retry the same request
    ///
    /// Nothing in this crate retries on its own.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderCall { status: None, .. } | Self::MediaFetch { .. } | Self::StreamTerminated(_) => true,
            Self::ProviderCall {
                status: Some(status), ..
            } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Stable machine-readable error category
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigUnreadable { .. } => "config_unreadable",
            Self::ConfigParse { .. } => "config_parse_error",
            Self::EnvironmentNotFound { .. } => "environment_not_found",
            Self::NoEnabledCredentials { .. } => "no_enabled_credentials",
            Self::InvalidWeightConfiguration { .. } => "invalid_weight_configuration",
            Self::Decryption { .. } => "decryption_error",
            Self::UnsupportedProvider { .. } => "unsupported_provider",
            Self::ClientConstruction { .. } => "client_construction_error",
            Self::MediaFetch { .. } => "media_fetch_error",
            Self::ProviderCall { .. } => "provider_call_error",
            Self::StreamTerminated(_) => "stream_terminated",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Cancelled => "cancelled",
            Self::Output(_) => "output_error",
        }
    }

    /// Vendor status code, when the error came from an HTTP response
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ProviderCall { status, .. } => *status,
            _ => None,
        }
    }
}
