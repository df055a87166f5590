//! Gemini `generateContent` client

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{Frame, ProviderClient, ProviderStream, SseStream};
use crate::LlmError;
use crate::normalize::{ProviderMessage, ProviderPart};
use crate::protocol::gemini::{
    GeminiCandidate, GeminiContent, GeminiError, GeminiFunctionCall, GeminiFunctionCallingConfig, GeminiFunctionDeclaration,
    GeminiFunctionResponse, GeminiGenerationConfig, GeminiInlineData, GeminiPart, GeminiRequest, GeminiResponse,
    GeminiSafetySetting, GeminiTool, GeminiToolConfig, GeminiUsageMetadata,
};
use crate::types::{
    ChatCompletion, ChatRequest, ChoiceMessage, FinishReason, Role, StreamDelta, StreamFunctionCall, StreamToolCall,
    ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_VERSION_PATH: &str = "/v1beta";

/// Base URL for an optional credential `api_endpoint`
///
/// A bare host gets `https://` and the default API version path.
pub fn base_url(api_endpoint: Option<&str>) -> String {
    let Some(endpoint) = api_endpoint.map(str::trim).filter(|e| !e.is_empty()) else {
        return DEFAULT_BASE_URL.to_owned();
    };

    let endpoint = if endpoint.contains("://") {
        endpoint.trim_end_matches('/').to_owned()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    };

    match url::Url::parse(&endpoint) {
        Ok(url) if url.path() == "/" => format!("{endpoint}{API_VERSION_PATH}"),
        _ => endpoint,
    }
}

/// Translate credential safety settings (`category: threshold`)
///
/// Unknown categories are skipped and unknown thresholds block at medium.
pub fn safety_settings(settings: &BTreeMap<String, Value>) -> Vec<GeminiSafetySetting> {
    settings
        .iter()
        .filter_map(|(category, threshold)| {
            let category = match category.as_str() {
                "harassment" => "HARM_CATEGORY_HARASSMENT",
                "hate_speech" => "HARM_CATEGORY_HATE_SPEECH",
                "sexually_explicit" => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
                "dangerous_content" => "HARM_CATEGORY_DANGEROUS_CONTENT",
                other => {
                    tracing::warn!(category = other, "ignoring unknown gemini safety category");
                    return None;
                }
            };

            let threshold = match threshold.as_str() {
                Some("none") => "BLOCK_NONE",
                Some("low") => "BLOCK_LOW_AND_ABOVE",
                Some("high") => "BLOCK_ONLY_HIGH",
                _ => "BLOCK_MEDIUM_AND_ABOVE",
            };

            Some(GeminiSafetySetting { category, threshold })
        })
        .collect()
}

pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    template: GeminiRequest,
}

impl GeminiClient {
    pub fn new(
        http: Client,
        base_url: String,
        api_key: SecretString,
        safety: Vec<GeminiSafetySetting>,
        request: &ChatRequest,
    ) -> Self {
        let params = &request.params;

        let declarations: Vec<GeminiFunctionDeclaration> = request
            .unique_tools()
            .into_iter()
            .map(|tool| GeminiFunctionDeclaration {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            })
            .collect();

        let template = GeminiRequest {
            generation_config: Some(GeminiGenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: request.top_k(),
                max_output_tokens: params.max_tokens,
                stop_sequences: params.stop.clone(),
                presence_penalty: params.presence_penalty,
                frequency_penalty: params.frequency_penalty,
                seed: params.seed,
            }),
            safety_settings: safety,
            tool_config: request.tool_choice.as_ref().map(tool_config),
            tools: (!declarations.is_empty()).then(|| {
                vec![GeminiTool {
                    function_declarations: declarations,
                }]
            }),
            ..GeminiRequest::default()
        };

        Self {
            http,
            base_url,
            api_key,
            model: request.model.clone(),
            template,
        }
    }

    fn body(&self, messages: Vec<ProviderMessage>) -> GeminiRequest {
        let (system_instruction, contents) = wire_contents(messages);

        GeminiRequest {
            contents,
            system_instruction,
            ..self.template.clone()
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url.trim_end_matches('/'), self.model)
    }

    async fn post(&self, url: String, body: &GeminiRequest) -> Result<reqwest::Response, LlmError> {
        let request = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body);

        super::send("gemini", request).await
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError> {
        let body = self.body(messages);
        let response = self.post(self.url("generateContent"), &body).await?;
        let wire: GeminiResponse = super::json_body("gemini", response).await?;

        Ok(completion(wire, &self.model))
    }

    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError> {
        let body = self.body(messages);
        let response = self.post(self.url("streamGenerateContent?alt=sse"), &body).await?;

        let mut state = StreamState::default();

        Ok(Box::new(SseStream::new("gemini", response, move |event: &Event| {
            let Some(wire) = super::parse_event::<GeminiResponse>("gemini", &event.data) else {
                return Ok(Frame::Deltas(Vec::new()));
            };

            match wire.error {
                Some(error) => Err(stream_error(error)),
                None => Ok(Frame::Deltas(state.deltas(wire))),
            }
        })))
    }
}

fn stream_error(error: GeminiError) -> LlmError {
    let message = match error.status {
        Some(status) => format!("{status}: {}", error.message),
        None => error.message,
    };

    match error.code {
        Some(code) => LlmError::provider_status("gemini", code, message),
        None => LlmError::provider_call("gemini", message),
    }
}

fn tool_config(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Mode(ToolChoiceMode::None) => ("NONE", None),
        ToolChoice::Mode(ToolChoiceMode::Auto) => ("AUTO", None),
        ToolChoice::Mode(ToolChoiceMode::Required) => ("ANY", None),
        ToolChoice::Function { function, .. } => ("ANY", Some(vec![function.name.clone()])),
    };

    GeminiToolConfig {
        function_calling_config: GeminiFunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

/// System messages become the system instruction; the rest become contents
fn wire_contents(messages: Vec<ProviderMessage>) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    // Gemini responses are matched by function name, not call id
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in messages {
        match message.role {
            Role::System => system.push(GeminiPart::text(message.text())),
            Role::Tool => {
                let text = message.text();
                let name = message
                    .name
                    .clone()
                    .or_else(|| {
                        message
                            .tool_call_id
                            .as_ref()
                            .and_then(|id| call_names.get(id).cloned())
                    })
                    .or(message.tool_call_id)
                    .unwrap_or_default();

                let response = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| serde_json::json!({ "result": text }));

                contents.push(GeminiContent {
                    role: Some("user".to_owned()),
                    parts: vec![GeminiPart {
                        function_response: Some(GeminiFunctionResponse { name, response }),
                        ..GeminiPart::default()
                    }],
                });
            }
            Role::User | Role::Assistant => {
                let role = if message.role == Role::User { "user" } else { "model" };
                let mut parts: Vec<GeminiPart> = message.content.into_iter().map(wire_part).collect();

                for call in message.tool_calls.unwrap_or_default() {
                    call_names.insert(call.id, call.function.name.clone());
                    parts.push(GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: call.function.name,
                            args: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| serde_json::json!({})),
                        }),
                        ..GeminiPart::default()
                    });
                }

                contents.push(GeminiContent {
                    role: Some(role.to_owned()),
                    parts,
                });
            }
        }
    }

    let system_instruction = (!system.is_empty()).then_some(GeminiContent {
        role: None,
        parts: system,
    });

    (system_instruction, contents)
}

fn wire_part(part: ProviderPart) -> GeminiPart {
    match part {
        ProviderPart::Text(text) => GeminiPart::text(text),
        ProviderPart::InlineData(data) => GeminiPart {
            inline_data: Some(GeminiInlineData {
                mime_type: data.mime_type,
                data: data.data,
            }),
            ..GeminiPart::default()
        },
    }
}

fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

const fn usage(metadata: GeminiUsageMetadata) -> Usage {
    Usage::new(
        metadata.prompt_token_count,
        metadata
            .candidates_token_count
            .saturating_add(metadata.thoughts_token_count),
    )
}

fn arguments(args: &Value) -> String {
    if args.is_null() {
        "{}".to_owned()
    } else {
        args.to_string()
    }
}

fn completion(wire: GeminiResponse, model: &str) -> ChatCompletion {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    let candidate = wire.candidates.into_iter().next();
    let reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());

    for part in candidate.and_then(|c| c.content).map(|c| c.parts).unwrap_or_default() {
        let thought = part.is_thought();
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall::function(
                format!("call_{}", tool_calls.len()),
                call.name,
                arguments(&call.args),
            ));
        } else if let Some(fragment) = part.text {
            if thought {
                reasoning.push_str(&fragment);
            } else {
                text.push_str(&fragment);
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        reason.as_deref().map(finish_reason)
    } else {
        Some(FinishReason::ToolCalls)
    };

    let message = ChoiceMessage {
        role: Role::Assistant,
        content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    };

    let mut completion = ChatCompletion::single(
        wire.model_version.unwrap_or_else(|| model.to_owned()),
        message,
        finish_reason,
        wire.usage_metadata.map(usage).unwrap_or_default(),
    );
    if let Some(id) = wire.response_id {
        completion.id = id;
    }
    completion
}

/// Tool call numbering across stream events
#[derive(Default)]
struct StreamState {
    tool_calls: u32,
}

impl StreamState {
    fn deltas(&mut self, wire: GeminiResponse) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();
        let Some(GeminiCandidate { content, finish_reason: reason }) = wire.candidates.into_iter().next() else {
            return deltas;
        };

        for part in content.map(|c| c.parts).unwrap_or_default() {
            let thought = part.is_thought();
            if let Some(call) = part.function_call {
                let index = self.tool_calls;
                self.tool_calls += 1;
                deltas.push(StreamDelta {
                    tool_call: Some(StreamToolCall {
                        index,
                        id: Some(format!("call_{index}")),
                        call_type: Some("function".to_owned()),
                        function: Some(StreamFunctionCall {
                            name: Some(call.name),
                            arguments: Some(arguments(&call.args)),
                        }),
                    }),
                    ..StreamDelta::default()
                });
            } else if let Some(fragment) = part.text {
                let delta = if thought {
                    StreamDelta {
                        reasoning_content: Some(fragment),
                        ..StreamDelta::default()
                    }
                } else {
                    StreamDelta::text(fragment)
                };
                deltas.push(delta);
            }
        }

        if let Some(reason) = reason {
            let reason = if self.tool_calls > 0 {
                FinishReason::ToolCalls
            } else {
                finish_reason(&reason)
            };
            deltas.push(StreamDelta {
                finish_reason: Some(reason),
                usage: wire.usage_metadata.map(usage),
                ..StreamDelta::default()
            });
        }

        deltas
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::InlineData;
    use crate::types::{MediaKind, Message, ToolDefinition};

    fn message(role: Role, parts: Vec<ProviderPart>) -> ProviderMessage {
        ProviderMessage {
            role,
            content: parts,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn base_url_variants() {
        assert_eq!(base_url(None), DEFAULT_BASE_URL);
        assert_eq!(base_url(Some("  ")), DEFAULT_BASE_URL);
        assert_eq!(base_url(Some("gemini.proxy.internal")), "https://gemini.proxy.internal/v1beta");
        assert_eq!(base_url(Some("http://127.0.0.1:9000/v1/")), "http://127.0.0.1:9000/v1");
    }

    #[test]
    fn safety_settings_are_translated() {
        let settings: BTreeMap<String, Value> = serde_json::from_value(json!({
            "harassment": "none",
            "hate_speech": "bogus",
            "dangerous_content": 3,
            "unknown": "high"
        }))
        .unwrap();

        assert_eq!(
            safety_settings(&settings),
            vec![
                GeminiSafetySetting {
                    category: "HARM_CATEGORY_DANGEROUS_CONTENT",
                    threshold: "BLOCK_MEDIUM_AND_ABOVE"
                },
                GeminiSafetySetting {
                    category: "HARM_CATEGORY_HARASSMENT",
                    threshold: "BLOCK_NONE"
                },
                GeminiSafetySetting {
                    category: "HARM_CATEGORY_HATE_SPEECH",
                    threshold: "BLOCK_MEDIUM_AND_ABOVE"
                },
            ]
        );
    }

    #[test]
    fn request_shape() {
        let mut request = ChatRequest::new("gemini-2.0-flash", vec![Message::text(Role::User, "hi")]);
        request.params.max_tokens = Some(64);
        request.extra = json!({"top_k": 40}).as_object().cloned();
        request.tools = Some(vec![ToolDefinition::function("lookup", None, None)]);

        let client = GeminiClient::new(
            Client::new(),
            DEFAULT_BASE_URL.to_owned(),
            SecretString::from("key"),
            Vec::new(),
            &request,
        );

        let messages = vec![
            message(Role::System, vec![ProviderPart::Text("be brief".into())]),
            message(
                Role::User,
                vec![
                    ProviderPart::Text("describe".into()),
                    ProviderPart::InlineData(InlineData {
                        kind: MediaKind::Audio,
                        mime_type: "audio/wav".into(),
                        data: "AAAA".into(),
                        filename: None,
                        detail: None,
                    }),
                ],
            ),
        ];

        let body = serde_json::to_value(client.body(messages)).unwrap();

        assert_eq!(body["systemInstruction"], json!({"parts": [{"text": "be brief"}]}));
        assert_eq!(
            body["contents"],
            json!([{"role": "user", "parts": [
                {"text": "describe"},
                {"inlineData": {"mimeType": "audio/wav", "data": "AAAA"}}
            ]}])
        );
        assert_eq!(body["generationConfig"], json!({"topK": 40, "maxOutputTokens": 64}));
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "lookup");
        assert!(body.get("safetySettings").is_none());
        assert_eq!(
            client.url("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn tool_results_are_named_after_the_call() {
        let mut assistant = message(Role::Assistant, Vec::new());
        assistant.tool_calls = Some(vec![ToolCall::function("call_0", "weather", "{\"city\":\"Oslo\"}")]);
        let mut tool = message(Role::Tool, vec![ProviderPart::Text("{\"temp\": 3}".into())]);
        tool.tool_call_id = Some("call_0".into());

        let (_, contents) = wire_contents(vec![assistant, tool]);
        let contents = serde_json::to_value(contents).unwrap();

        assert_eq!(
            contents[0]["parts"][0],
            json!({"functionCall": {"name": "weather", "args": {"city": "Oslo"}}})
        );
        assert_eq!(
            contents[1]["parts"][0],
            json!({"functionResponse": {"name": "weather", "response": {"temp": 3}}})
        );
    }

    #[test]
    fn response_with_thoughts_and_usage() {
        let wire: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "pondering", "thought": true},
                    {"text": "Hello"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "thoughtsTokenCount": 1},
            "responseId": "gem-1"
        }))
        .unwrap();

        let completion = completion(wire, "gemini-2.5-pro");
        let message = &completion.choices[0].message;

        assert_eq!(completion.id, "gem-1");
        assert_eq!(completion.model, "gemini-2.5-pro");
        assert_eq!(message.content.as_deref(), Some("Hello"));
        assert_eq!(message.reasoning_content.as_deref(), Some("pondering"));
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage, Usage::new(4, 3));
    }

    #[test]
    fn stream_numbers_tool_calls_and_reports_finish() {
        let mut state = StreamState::default();
        let event = |value: Value| serde_json::from_value::<GeminiResponse>(value).unwrap();

        let first = state.deltas(event(json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "a", "args": {}}}]}}]
        })));
        let last = state.deltas(event(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "b"}}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 1}
        })));

        assert_eq!(first[0].tool_call.as_ref().unwrap().index, 0);
        assert_eq!(last[0].tool_call.as_ref().unwrap().id.as_deref(), Some("call_1"));
        assert_eq!(
            last[0].tool_call.as_ref().unwrap().function.as_ref().unwrap().arguments.as_deref(),
            Some("{}")
        );
        assert_eq!(last[1].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(last[1].usage, Some(Usage::new(1, 1)));
    }

    #[test]
    fn in_band_error_keeps_code_and_status() {
        let wire: GeminiResponse = serde_json::from_value(json!({
            "error": {"code": 500, "message": "internal", "status": "INTERNAL"}
        }))
        .unwrap();

        let err = stream_error(wire.error.unwrap());

        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("INTERNAL: internal"));
    }
}
