//! Canonical messages to provider-ready messages
//!
//! Media parts are resolved into base64 inline data: remote URLs are fetched
//! up to a size cap, `data:` URLs are passed through untouched. Provider adapters then map the
//! inline data onto their native shapes.

pub mod mime;

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use url::Url;

pub use self::mime::{ExtensionMime, MimeStrategies, MimeStrategy};
use crate::LlmError;
use crate::types::{MediaKind, MediaPart, Message, Part, Role, ToolCall};

/// Message with every media reference resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: Vec<ProviderPart>,
    pub name: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl ProviderMessage {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ProviderPart::Text(text) => Some(text.as_str()),
                ProviderPart::InlineData(_) => None,
            })
            .collect()
    }

    /// Whether every part is text
    pub fn is_text_only(&self) -> bool {
        self.content.iter().all(|part| matches!(part, ProviderPart::Text(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderPart {
    Text(String),
    InlineData(InlineData),
}

/// Base64 media payload with its resolved MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub kind: MediaKind,
    pub mime_type: String,
    /// Standard base64
    pub data: String,
    pub filename: Option<String>,
    pub detail: Option<String>,
}

impl InlineData {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Raw payload bytes
    pub fn decode(&self) -> Result<Vec<u8>, LlmError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| LlmError::InvalidRequest(format!("{} payload is not valid base64: {e}", self.kind)))
    }
}

/// Default cap on a fetched media body
pub const MAX_MEDIA_BYTES: usize = 20 * 1024 * 1024;

/// Resolves media parts into inline data
#[derive(Debug, Clone)]
pub struct MessageNormalizer {
    client: reqwest::Client,
    mime: MimeStrategies,
    max_media_bytes: usize,
}

impl MessageNormalizer {
    /// Normalizer with its own HTTP client bounded by `fetch_timeout`
    pub fn new(fetch_timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| LlmError::client_construction("media", e.to_string()))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            mime: MimeStrategies::default(),
            max_media_bytes: MAX_MEDIA_BYTES,
        }
    }

    /// Reject remote media larger than `max` bytes
    #[must_use]
    pub const fn with_max_media_bytes(mut self, max: usize) -> Self {
        self.max_media_bytes = max;
        self
    }

    #[must_use]
    pub fn with_mime_strategies(mut self, mime: MimeStrategies) -> Self {
        self.mime = mime;
        self
    }

    /// Resolve every message, preserving message and part order
    pub async fn normalize(&self, messages: &[Message]) -> Result<Vec<ProviderMessage>, LlmError> {
        let mut normalized = Vec::with_capacity(messages.len());

        for message in messages {
            let content = match (&message.content, &message.parts) {
                (Some(text), _) => vec![ProviderPart::Text(text.clone())],
                (None, Some(parts)) => {
                    let mut resolved = Vec::with_capacity(parts.len());
                    for part in parts {
                        resolved.push(self.part(part).await?);
                    }
                    resolved
                }
                (None, None) => Vec::new(),
            };

            normalized.push(ProviderMessage {
                role: message.role,
                content,
                name: message.name.clone(),
                tool_calls: message.tool_calls.clone(),
                tool_call_id: message.tool_call_id.clone(),
            });
        }

        Ok(normalized)
    }

    async fn part(&self, part: &Part) -> Result<ProviderPart, LlmError> {
        let Some((kind, media)) = part.media() else {
            return Ok(ProviderPart::Text(part.as_text().unwrap_or_default().to_owned()));
        };

        let url = Url::parse(&media.url)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid {kind} URL: {e}")))?;

        let (mime_type, data) = match url.scheme() {
            "data" => {
                let rest = media.url.split_once(':').map_or("", |(_, rest)| rest);
                inline_data_url(kind, media, rest, self.mime.for_kind(kind))?
            }
            "http" | "https" => self.fetch(kind, media, &url).await?,
            scheme => {
                return Err(LlmError::InvalidRequest(format!(
                    "unsupported {kind} URL scheme: {scheme}"
                )));
            }
        };

        Ok(ProviderPart::InlineData(InlineData {
            kind,
            mime_type,
            data,
            filename: media.filename.clone(),
            detail: media.detail.clone(),
        }))
    }

    async fn fetch(&self, kind: MediaKind, media: &MediaPart, url: &Url) -> Result<(String, String), LlmError> {
        let fetch_error = |reason: String| LlmError::MediaFetch {
            url: media.url.clone(),
            reason,
        };
        let too_large = || {
            tracing::warn!(url = %media.url, limit = self.max_media_bytes, "media body too large");
            fetch_error(format!("body exceeds {} bytes", self.max_media_bytes))
        };

        let mut response = self.client.get(url.as_str()).send().await.map_err(|e| {
            tracing::warn!(url = %media.url, error = %e, "media fetch failed");
            fetch_error(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %media.url, status = %status, "media server returned error");
            return Err(fetch_error(format!("server returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);

        if response
            .content_length()
            .is_some_and(|length| length > u64::try_from(self.max_media_bytes).unwrap_or(u64::MAX))
        {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e.to_string()))? {
            if bytes.len() + chunk.len() > self.max_media_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        let mime_type = media.mime_type.clone().unwrap_or_else(|| {
            self.mime
                .for_kind(kind)
                .detect(&media.url, content_type.as_deref())
        });

        tracing::debug!(url = %media.url, kind = %kind, mime = %mime_type, bytes = bytes.len(), "inlined remote media");

        Ok((mime_type, STANDARD.encode(bytes)))
    }
}

/// Split `data:<mime>[;params];base64,<payload>` without re-encoding the payload
fn inline_data_url(
    kind: MediaKind,
    media: &MediaPart,
    rest: &str,
    strategy: &dyn MimeStrategy,
) -> Result<(String, String), LlmError> {
    let malformed = |reason: &str| LlmError::InvalidRequest(format!("malformed {kind} data URL: {reason}"));

    let (header, payload) = rest.split_once(',').ok_or_else(|| malformed("missing ','"))?;

    let mut params = header.split(';');
    let prefix_mime = params.next().unwrap_or_default().trim();

    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err(malformed("payload must be base64-encoded"));
    }

    if payload.is_empty() || STANDARD.decode(payload).is_err() {
        return Err(malformed("payload is not valid base64"));
    }

    let mime_type = match (&media.mime_type, prefix_mime) {
        (Some(explicit), _) => explicit.clone(),
        (None, "") => strategy.detect("", None),
        (None, mime) => mime.to_ascii_lowercase(),
    };

    Ok((mime_type, payload.to_owned()))
}
