//! Request dispatch
//!
//! Validates a canonical request, resolves the vendor and one of its
//! credentials, normalizes the messages and then either returns the full
//! completion or streams SSE frames into a caller-supplied writer.

use std::path::PathBuf;
use std::sync::Arc;

use switchboard_config::{Config, DEFAULT_PROVIDER, Environment, MediaConfig};
use switchboard_keys::KeyManager;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::LlmError;
use crate::bridge::{ChunkStream, bridge};
use crate::credentials::CredentialStore;
use crate::normalize::{MessageNormalizer, MimeStrategies, ProviderMessage};
use crate::provider::ProviderClient;
use crate::types::{ChatCompletion, ChatRequest};
use crate::vendor::{ConnectContext, VendorRegistry};

/// Stream output target for [`Dispatcher::dispatch`]
pub type Output<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Entry point for chat completions
#[derive(Clone)]
pub struct Dispatcher {
    keys: Arc<dyn KeyManager>,
    store: Arc<CredentialStore>,
    environment: Environment,
    default_provider: String,
    normalizer: MessageNormalizer,
    registry: Arc<VendorRegistry>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Copy of this dispatcher resolving credentials in `environment`
    #[must_use]
    pub fn with_environment(&self, environment: impl Into<Environment>) -> Self {
        Self {
            environment: environment.into(),
            ..self.clone()
        }
    }

    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Run `request` to completion, ignoring its `stream` flag
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let (client, messages) = self.prepare(request).await?;

        let completion = client.generate(messages).await?;

        Ok(completion.normalized(&request.model))
    }

    /// Open a bridged chunk stream for `request`, ignoring its `stream` flag
    pub async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let (client, messages) = self.prepare(request).await?;

        let native = client.stream(messages).await?;

        Ok(bridge(native, &request.model, cancel))
    }

    /// Dispatch `request`
    ///
    /// Streaming requests with an `output` write SSE frames into it and
    /// return `None`. Everything else returns the full completion.
    pub async fn dispatch(&self, request: &ChatRequest, output: Option<Output<'_>>) -> Result<Option<ChatCompletion>, LlmError> {
        self.dispatch_with_cancel(request, output, CancellationToken::new())
            .await
    }

    /// [`Dispatcher::dispatch`], stopping with [`LlmError::Cancelled`] once
    /// `cancel` fires
    pub async fn dispatch_with_cancel(
        &self,
        request: &ChatRequest,
        output: Option<Output<'_>>,
        cancel: CancellationToken,
    ) -> Result<Option<ChatCompletion>, LlmError> {
        match output {
            Some(writer) if request.stream => {
                let chunks = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(LlmError::Cancelled),
                    chunks = self.stream(request, cancel.child_token()) => chunks,
                }?;
                crate::sse::write_stream(chunks, writer, &cancel).await?;
                Ok(None)
            }
            _ => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(LlmError::Cancelled),
                    completion = self.complete(request) => completion.map(Some),
                }
            }
        }
    }

    async fn prepare(&self, request: &ChatRequest) -> Result<(Box<dyn ProviderClient>, Vec<ProviderMessage>), LlmError> {
        request.validate().map_err(LlmError::InvalidRequest)?;

        let provider = request.provider.as_deref().unwrap_or(&self.default_provider);
        let vendor = self.registry.get(provider).inspect_err(|_| {
            tracing::warn!(provider, "unsupported provider requested");
        })?;

        tracing::debug!(
            provider,
            model = %request.model,
            environment = %self.environment,
            stream = request.stream,
            "dispatching request"
        );

        let ctx = ConnectContext {
            store: &self.store,
            keys: self.keys.as_ref(),
            environment: self.environment.as_str(),
        };
        let client = vendor.connect(ctx, request).await?;

        let messages = self.normalizer.normalize(&request.messages).await?;

        Ok((client, messages))
    }
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    keys: Option<Arc<dyn KeyManager>>,
    credentials_dir: Option<PathBuf>,
    environment: Option<Environment>,
    default_provider: Option<String>,
    normalizer: Option<MessageNormalizer>,
    mime: Option<MimeStrategies>,
    registry: Option<VendorRegistry>,
    media: Option<MediaConfig>,
}

impl DispatcherBuilder {
    /// Pre-fill everything the gateway config describes
    #[must_use]
    pub fn config(self, config: &Config) -> Self {
        Self {
            credentials_dir: Some(config.credentials_dir.clone()),
            environment: Some(config.environment()),
            default_provider: Some(config.default_provider.clone()),
            media: Some(config.media.clone()),
            ..self
        }
    }

    #[must_use]
    pub fn key_manager(mut self, keys: Arc<dyn KeyManager>) -> Self {
        self.keys = Some(keys);
        self
    }

    #[must_use]
    pub fn credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    /// Defaults to [`Environment::from_env`]
    #[must_use]
    pub fn environment(mut self, environment: impl Into<Environment>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    /// Media fetcher; replaces the one built from the media config
    #[must_use]
    pub fn normalizer(mut self, normalizer: MessageNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    #[must_use]
    pub fn mime_strategies(mut self, mime: MimeStrategies) -> Self {
        self.mime = Some(mime);
        self
    }

    /// Defaults to [`VendorRegistry::with_defaults`]
    #[must_use]
    pub fn registry(mut self, registry: VendorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Dispatcher, LlmError> {
        let keys = self
            .keys
            .ok_or_else(|| LlmError::client_construction("dispatcher", "a key manager is required"))?;
        let credentials_dir = self
            .credentials_dir
            .ok_or_else(|| LlmError::client_construction("dispatcher", "a credentials directory is required"))?;

        let normalizer = match self.normalizer {
            Some(normalizer) => normalizer,
            None => {
                let media = self.media.unwrap_or_default();
                MessageNormalizer::new(media.fetch_timeout())?.with_max_media_bytes(media.max_bytes)
            }
        };
        let normalizer = match self.mime {
            Some(mime) => normalizer.with_mime_strategies(mime),
            None => normalizer,
        };

        Ok(Dispatcher {
            keys,
            store: Arc::new(CredentialStore::new(credentials_dir)),
            environment: self.environment.unwrap_or_else(Environment::from_env),
            default_provider: self.default_provider.unwrap_or_else(|| DEFAULT_PROVIDER.to_owned()),
            normalizer,
            registry: Arc::new(self.registry.unwrap_or_else(VendorRegistry::with_defaults)),
        })
    }
}
