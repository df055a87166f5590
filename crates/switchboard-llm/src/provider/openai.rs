//! OpenAI-compatible chat completions client
//!
//! Serves `OpenAI`, Azure `OpenAI` and `DeepSeek`. They share the wire format
//! and differ only in endpoint layout and authentication header.

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use url::Url;

use super::{Frame, ProviderClient, ProviderStream, SseStream};
use crate::LlmError;
use crate::normalize::{InlineData, ProviderMessage, ProviderPart};
use crate::protocol::openai::{
    OpenAiChoice, OpenAiContent, OpenAiContentPart, OpenAiFile, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl,
    OpenAiInputAudio, OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiStreamOptions,
    OpenAiStreamToolCall, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::types::response::COMPLETION_OBJECT;
use crate::types::{
    ChatCompletion, ChatRequest, Choice, ChoiceMessage, FinishReason, FunctionCall, MediaKind, Role, StreamDelta,
    StreamFunctionCall, StreamToolCall, ToolCall, Usage,
};

/// How the API key is presented
pub enum Auth {
    /// `Authorization: Bearer`, plus `OpenAI-Organization` when set
    Bearer {
        api_key: SecretString,
        organization: Option<String>,
    },
    /// Azure's `api-key` header
    ApiKeyHeader(SecretString),
}

/// Where and how to reach one compatible deployment
pub struct Endpoint {
    /// Full chat completions URL
    pub url: String,
    pub auth: Auth,
    /// Ask for a usage chunk at the end of streams
    pub stream_usage: bool,
}

/// `{base}/chat/completions`
pub fn chat_completions_url(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

/// Azure deployment URL
pub fn azure_deployment_url(endpoint: &str, deployment_id: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment_id}/chat/completions?api-version={api_version}",
        endpoint.trim_end_matches('/')
    )
}

/// Whether `url` points at the canonical `OpenAI` API
///
/// Many compatible servers reject `stream_options`.
pub fn is_canonical_openai(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .is_some_and(|url| url.host_str() == Some("api.openai.com"))
}

pub struct OpenAiCompatClient {
    name: &'static str,
    http: Client,
    endpoint: Endpoint,
    template: OpenAiRequest,
    extra: Map<String, Value>,
}

impl OpenAiCompatClient {
    pub fn new(name: &'static str, http: Client, endpoint: Endpoint, request: &ChatRequest) -> Self {
        let tools: Vec<OpenAiTool> = request
            .unique_tools()
            .into_iter()
            .map(|tool| OpenAiTool {
                tool_type: tool.tool_type,
                function: OpenAiFunction {
                    name: tool.function.name,
                    description: tool.function.description,
                    parameters: tool.function.parameters,
                },
            })
            .collect();

        let template = OpenAiRequest {
            model: request.model.clone(),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            stop: request.params.stop.clone(),
            frequency_penalty: request.params.frequency_penalty,
            presence_penalty: request.params.presence_penalty,
            seed: request.params.seed,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: request
                .tool_choice
                .as_ref()
                .and_then(|choice| serde_json::to_value(choice).ok()),
            ..OpenAiRequest::default()
        };

        let mut extra = request.extra.clone().unwrap_or_default();
        // Not part of the compatible wire format
        extra.remove("top_k");

        Self {
            name,
            http,
            endpoint,
            template,
            extra,
        }
    }

    /// Wire body: canonical fields first, extension keys never override them
    fn body(&self, messages: Vec<ProviderMessage>, stream: bool) -> Result<Value, LlmError> {
        let mut request = self.template.clone();
        request.messages = messages.into_iter().map(wire_message).collect();

        if stream {
            request.stream = Some(true);
            request.stream_options = self
                .endpoint
                .stream_usage
                .then_some(OpenAiStreamOptions { include_usage: true });
        }

        let mut body = serde_json::to_value(&request)
            .map_err(|e| LlmError::InvalidRequest(format!("failed to encode {} request: {e}", self.name)))?;

        if let Value::Object(fields) = &mut body {
            for (key, value) in &self.extra {
                fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        Ok(body)
    }

    fn post(&self, body: &Value) -> RequestBuilder {
        let builder = self.http.post(&self.endpoint.url).json(body);

        match &self.endpoint.auth {
            Auth::Bearer {
                api_key,
                organization,
            } => {
                let builder = builder.bearer_auth(api_key.expose_secret());
                match organization {
                    Some(organization) => builder.header("OpenAI-Organization", organization),
                    None => builder,
                }
            }
            Auth::ApiKeyHeader(api_key) => builder.header("api-key", api_key.expose_secret()),
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError> {
        let body = self.body(messages, false)?;
        let response = super::send(self.name, self.post(&body)).await?;
        let wire: OpenAiResponse = super::json_body(self.name, response).await?;

        Ok(completion(wire))
    }

    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError> {
        let body = self.body(messages, true)?;
        let response = super::send(self.name, self.post(&body)).await?;
        let name = self.name;

        Ok(Box::new(SseStream::new(name, response, move |event: &Event| {
            decode_event(name, event)
        })))
    }
}

fn decode_event(provider: &str, event: &Event) -> Result<Frame, LlmError> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }

    let Some(chunk) = super::parse_event::<OpenAiStreamChunk>(provider, data) else {
        return Ok(Frame::Deltas(Vec::new()));
    };

    if let Some(error) = chunk.error {
        let message = match error.error_type {
            Some(kind) => format!("{kind}: {}", error.message),
            None => error.message,
        };
        return Err(LlmError::provider_call(provider, message));
    }

    Ok(Frame::Deltas(chunk_deltas(chunk)))
}

fn wire_message(message: ProviderMessage) -> OpenAiMessage {
    let content = if message.content.is_empty() {
        None
    } else if message.is_text_only() {
        Some(OpenAiContent::Text(message.text()))
    } else {
        Some(OpenAiContent::Parts(
            message.content.into_iter().filter_map(wire_part).collect(),
        ))
    };

    OpenAiMessage {
        role: message.role.as_str().to_owned(),
        content,
        name: message.name,
        tool_calls: message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| OpenAiToolCall {
                    id: call.id,
                    tool_type: call.call_type,
                    function: OpenAiFunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id,
    }
}

fn wire_part(part: ProviderPart) -> Option<OpenAiContentPart> {
    let data = match part {
        ProviderPart::Text(text) => return Some(OpenAiContentPart::Text { text }),
        ProviderPart::InlineData(data) => data,
    };

    match data.kind {
        MediaKind::Image => Some(OpenAiContentPart::ImageUrl {
            image_url: OpenAiImageUrl {
                url: data.data_url(),
                detail: data.detail,
            },
        }),
        MediaKind::Audio => Some(OpenAiContentPart::InputAudio {
            input_audio: OpenAiInputAudio {
                format: audio_format(&data).to_owned(),
                data: data.data,
            },
        }),
        MediaKind::File => Some(OpenAiContentPart::File {
            file: OpenAiFile {
                file_data: data.data_url(),
                filename: data.filename,
            },
        }),
        MediaKind::Video => {
            tracing::warn!(mime = %data.mime_type, "video input is not supported by OpenAI-compatible vendors, dropping part");
            None
        }
    }
}

fn audio_format(data: &InlineData) -> &str {
    match data.mime_type.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        other => other.rsplit('/').next().unwrap_or(other),
    }
}

fn completion(wire: OpenAiResponse) -> ChatCompletion {
    ChatCompletion {
        id: wire.id,
        object: COMPLETION_OBJECT.to_owned(),
        created: wire.created,
        model: wire.model,
        choices: wire.choices.into_iter().map(choice).collect(),
        usage: wire.usage.map(usage).unwrap_or_default(),
    }
}

fn choice(wire: OpenAiChoice) -> Choice {
    Choice {
        index: wire.index,
        message: ChoiceMessage {
            role: Role::Assistant,
            content: wire.message.content,
            reasoning_content: wire.message.reasoning_content,
            tool_calls: wire.message.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        call_type: call.tool_type,
                        function: FunctionCall {
                            name: call.function.name,
                            arguments: call.function.arguments,
                        },
                    })
                    .collect()
            }),
        },
        finish_reason: wire.finish_reason.as_deref().map(FinishReason::from_openai),
    }
}

const fn usage(wire: OpenAiUsage) -> Usage {
    Usage::new(wire.prompt_tokens, wire.completion_tokens)
}

/// Split one wire chunk into deltas; only the first choice is forwarded
fn chunk_deltas(chunk: OpenAiStreamChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    if let Some(choice) = chunk.choices.into_iter().find(|choice| choice.index == 0) {
        let mut calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(stream_tool_call);

        deltas.push(StreamDelta {
            role: choice
                .delta
                .role
                .as_deref()
                .filter(|role| *role == "assistant")
                .map(|_| Role::Assistant),
            content: choice.delta.content,
            reasoning_content: choice.delta.reasoning_content,
            tool_call: calls.next(),
            ..StreamDelta::default()
        });

        deltas.extend(calls.map(|call| StreamDelta {
            tool_call: Some(call),
            ..StreamDelta::default()
        }));

        if let (Some(reason), Some(last)) = (choice.finish_reason, deltas.last_mut()) {
            last.finish_reason = Some(FinishReason::from_openai(&reason));
        }
    }

    if let Some(wire) = chunk.usage {
        deltas.push(StreamDelta {
            usage: Some(usage(wire)),
            ..StreamDelta::default()
        });
    }

    deltas
}

fn stream_tool_call(wire: OpenAiStreamToolCall) -> StreamToolCall {
    StreamToolCall {
        index: wire.index,
        id: wire.id,
        call_type: wire.tool_type,
        function: wire.function.map(|function| StreamFunctionCall {
            name: function.name,
            arguments: function.arguments,
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Message, ToolDefinition};

    fn client(request: &ChatRequest, stream_usage: bool) -> OpenAiCompatClient {
        let endpoint = Endpoint {
            url: chat_completions_url("https://api.openai.com/v1/"),
            auth: Auth::Bearer {
                api_key: SecretString::from("sk-test"),
                organization: None,
            },
            stream_usage,
        };
        OpenAiCompatClient::new("openai", Client::new(), endpoint, request)
    }

    fn user(parts: Vec<ProviderPart>) -> ProviderMessage {
        ProviderMessage {
            role: Role::User,
            content: parts,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn inline(kind: MediaKind, mime_type: &str) -> ProviderPart {
        ProviderPart::InlineData(InlineData {
            kind,
            mime_type: mime_type.to_owned(),
            data: "AAAA".to_owned(),
            filename: Some("doc.pdf".to_owned()),
            detail: None,
        })
    }

    #[test]
    fn urls() {
        assert_eq!(chat_completions_url("https://api.deepseek.com/"), "https://api.deepseek.com/chat/completions");
        assert_eq!(
            azure_deployment_url("https://east.openai.azure.com/", "gpt4o", "2024-10-21"),
            "https://east.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2024-10-21"
        );
        assert!(is_canonical_openai("https://api.openai.com/v1/chat/completions"));
        assert!(!is_canonical_openai("http://127.0.0.1:8080/v1/chat/completions"));
    }

    #[test]
    fn body_merges_extra_without_overriding_canonical_fields() {
        let mut request = ChatRequest::new("gpt-4o", vec![Message::text(Role::User, "hi")]);
        request.params.temperature = Some(0.2);
        request.extra = Some(
            json!({"response_format": {"type": "json_object"}, "user": "u-1", "model": "evil", "top_k": 5})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let body = client(&request, true)
            .body(vec![user(vec![ProviderPart::Text("hi".into())])], false)
            .unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["user"], "u-1");
        assert!(body.get("top_k").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn stream_body_requests_usage_only_when_asked() {
        let request = ChatRequest::new("gpt-4o", vec![Message::text(Role::User, "hi")]);

        let with_usage = client(&request, true).body(Vec::new(), true).unwrap();
        assert_eq!(with_usage["stream"], true);
        assert_eq!(with_usage["stream_options"]["include_usage"], true);

        let without = client(&request, false).body(Vec::new(), true).unwrap();
        assert!(without.get("stream_options").is_none());
    }

    #[test]
    fn duplicate_tools_are_sent_once() {
        let mut request = ChatRequest::new("gpt-4o", vec![Message::text(Role::User, "hi")]);
        request.tools = Some(vec![
            ToolDefinition::function("lookup", Some("first".into()), None),
            ToolDefinition::function("lookup", Some("second".into()), None),
        ]);

        let body = client(&request, false).body(Vec::new(), false).unwrap();

        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["function"]["description"], "first");
    }

    #[test]
    fn media_parts_map_onto_wire_parts() {
        let message = user(vec![
            ProviderPart::Text("what is this".into()),
            inline(MediaKind::Image, "image/png"),
            inline(MediaKind::Audio, "audio/wav"),
            inline(MediaKind::File, "application/pdf"),
            inline(MediaKind::Video, "video/mp4"),
        ]);

        let wire = serde_json::to_value(wire_message(message)).unwrap();

        assert_eq!(
            wire["content"],
            json!([
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "input_audio", "input_audio": {"data": "AAAA", "format": "wav"}},
                {"type": "file", "file": {"filename": "doc.pdf", "file_data": "data:application/pdf;base64,AAAA"}},
            ])
        );
    }

    #[test]
    fn response_keeps_reasoning_and_tool_calls() {
        let wire: OpenAiResponse = serde_json::from_value(json!({
            "id": "resp-1",
            "created": 1_700_000_000,
            "model": "deepseek-reasoner",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "reasoning_content": "thinking...",
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}
        }))
        .unwrap();

        let completion = completion(wire);
        let choice = &completion.choices[0];

        assert_eq!(completion.usage, Usage::new(7, 3));
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("thinking..."));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "lookup");
    }

    #[test]
    fn chunk_with_tool_calls_finish_and_usage() {
        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [
                        {"index": 0, "id": "a", "type": "function", "function": {"name": "one", "arguments": ""}},
                        {"index": 1, "id": "b", "type": "function", "function": {"name": "two", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2}
        }))
        .unwrap();

        let deltas = chunk_deltas(chunk);

        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0].tool_call.as_ref().unwrap().id.as_deref(), Some("a"));
        assert_eq!(deltas[1].tool_call.as_ref().unwrap().index, 1);
        assert_eq!(deltas[1].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(deltas[2].usage, Some(Usage::new(1, 2)));
    }

    #[test]
    fn done_marker_ends_the_stream() {
        let event = Event {
            data: "[DONE]".into(),
            ..Event::default()
        };

        assert!(matches!(decode_event("openai", &event), Ok(Frame::Done)));
    }

    #[test]
    fn in_band_error_fails_the_stream() {
        let event = Event {
            data: r#"{"error":{"message":"overloaded","type":"server_error"}}"#.into(),
            ..Event::default()
        };

        let Err(LlmError::ProviderCall { provider, message, .. }) = decode_event("deepseek", &event) else {
            panic!("expected a provider error");
        };
        assert_eq!(provider, "deepseek");
        assert_eq!(message, "server_error: overloaded");
    }
}
