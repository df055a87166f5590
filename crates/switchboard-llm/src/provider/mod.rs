//! Vendor clients
//!
//! A client is built per call from one decrypted credential and the canonical
//! request. It exposes a one-shot `generate` and a native `stream`; the
//! streaming bridge turns the latter into normalized chunks.

pub mod bedrock;
pub mod claude;
pub mod gemini;
pub mod openai;
#[cfg(test)]
pub(crate) mod scripted;

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};

use crate::LlmError;
use crate::normalize::ProviderMessage;
use crate::types::{ChatCompletion, StreamDelta};

/// Client bound to one vendor credential and one request
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Vendor name, for logs and errors
    fn name(&self) -> &str;

    /// Send the request and wait for the full response
    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError>;

    /// Open the vendor's native stream
    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError>;
}

/// Pull-based native stream, owned by exactly one reader
#[async_trait]
pub trait ProviderStream: Send {
    /// Next delta, or `None` once the vendor ended the stream
    async fn recv(&mut self) -> Result<Option<StreamDelta>, LlmError>;

    /// Release the underlying connection; later `recv` calls yield `None`
    async fn close(&mut self) {}
}

/// HTTP client honouring a credential's timeout and proxy
pub(crate) fn http_client(provider: &str, timeout: Option<Duration>, proxy: Option<&str>) -> Result<Client, LlmError> {
    let mut builder = Client::builder();

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| LlmError::client_construction(provider, format!("invalid proxy {proxy}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| LlmError::client_construction(provider, e.to_string()))
}

/// Send a request, turning transport failures and non-2xx statuses into errors
pub(crate) async fn send(provider: &str, request: RequestBuilder) -> Result<Response, LlmError> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(provider, error = %e, "upstream request failed");
        LlmError::provider_call(provider, e.to_string())
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status = %status, "upstream returned error");

    Err(LlmError::provider_status(
        provider,
        status.as_u16(),
        format!("provider returned {status}: {}", error_message(&body)),
    ))
}

/// Read and decode a JSON response body
pub(crate) async fn json_body<T: serde::de::DeserializeOwned>(provider: &str, response: Response) -> Result<T, LlmError> {
    response
        .json()
        .await
        .map_err(|e| LlmError::provider_call(provider, format!("failed to parse response: {e}")))
}

/// `error.message` of a vendor error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Outcome of decoding one server-sent event
pub(crate) enum Frame {
    Deltas(Vec<StreamDelta>),
    Done,
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, String>> + Send>>;

/// Native stream over an SSE response body
///
/// `decode` sees every event in order and may keep state between events.
pub(crate) struct SseStream<F> {
    provider: &'static str,
    events: Option<EventStream>,
    decode: F,
    pending: VecDeque<StreamDelta>,
}

impl<F> SseStream<F>
where
    F: FnMut(&Event) -> Result<Frame, LlmError> + Send,
{
    pub(crate) fn new(provider: &'static str, response: Response, decode: F) -> Self {
        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| event.map_err(|e| e.to_string()));

        Self {
            provider,
            events: Some(Box::pin(events)),
            decode,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl<F> ProviderStream for SseStream<F>
where
    F: FnMut(&Event) -> Result<Frame, LlmError> + Send,
{
    async fn recv(&mut self) -> Result<Option<StreamDelta>, LlmError> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Ok(Some(delta));
            }

            let Some(events) = self.events.as_mut() else {
                return Ok(None);
            };

            match events.next().await {
                None => {
                    self.events = None;
                }
                Some(Err(e)) => {
                    tracing::error!(provider = self.provider, error = %e, "stream read failed");
                    self.events = None;
                    return Err(LlmError::provider_call(self.provider, format!("stream read failed: {e}")));
                }
                Some(Ok(event)) => match (self.decode)(&event)? {
                    Frame::Done => self.events = None,
                    Frame::Deltas(deltas) => self.pending.extend(deltas.into_iter().filter(|d| !d.is_empty())),
                },
            }
        }
    }

    async fn close(&mut self) {
        self.events = None;
        self.pending.clear();
    }
}

/// Parse an event payload, logging and skipping payloads that do not match
pub(crate) fn parse_event<T: serde::de::DeserializeOwned>(provider: &str, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(provider, error = %e, data = %data, "skipping unparseable SSE event");
            None
        }
    }
}

/// Clamp a vendor token count into the canonical `u32`
pub(crate) fn token_count(count: i32) -> u32 {
    u32::try_from(count).unwrap_or(0)
}
