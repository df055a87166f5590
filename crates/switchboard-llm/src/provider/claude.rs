//! Anthropic Messages API client

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::{Frame, ProviderClient, ProviderStream, SseStream};
use crate::LlmError;
use crate::normalize::{InlineData, ProviderMessage, ProviderPart};
use crate::protocol::claude::{
    ClaudeContentBlock, ClaudeMessage, ClaudeRequest, ClaudeResponse, ClaudeResponseBlock, ClaudeSource,
    ClaudeStreamDelta, ClaudeStreamEvent, ClaudeTool, ClaudeToolChoice, ClaudeUsage,
};
use crate::types::{
    ChatCompletion, ChatRequest, ChoiceMessage, FinishReason, MediaKind, Role, StreamDelta, StreamFunctionCall,
    StreamToolCall, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Used when the request leaves `max_tokens` unset; the API requires one
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct ClaudeClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    template: ClaudeRequest,
}

impl ClaudeClient {
    pub fn new(http: Client, base_url: String, api_key: SecretString, request: &ChatRequest) -> Self {
        let params = &request.params;

        let tools: Vec<ClaudeTool> = request
            .unique_tools()
            .into_iter()
            .map(|tool| ClaudeTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool
                    .function
                    .parameters
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            })
            .collect();
        let has_tools = !tools.is_empty();

        let template = ClaudeRequest {
            model: request.model.clone(),
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: request.top_k(),
            stop_sequences: params.stop.clone(),
            tools: has_tools.then_some(tools),
            tool_choice: request.tool_choice.as_ref().filter(|_| has_tools).map(tool_choice),
            ..ClaudeRequest::default()
        };

        Self {
            http,
            base_url,
            api_key,
            template,
        }
    }

    fn body(&self, messages: Vec<ProviderMessage>, stream: bool) -> ClaudeRequest {
        let (system, messages) = wire_messages(messages);

        ClaudeRequest {
            system,
            messages,
            stream: stream.then_some(true),
            ..self.template.clone()
        }
    }

    async fn post(&self, body: &ClaudeRequest) -> Result<reqwest::Response, LlmError> {
        let request = self
            .http
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);

        super::send("claude", request).await
    }
}

#[async_trait]
impl ProviderClient for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError> {
        let body = self.body(messages, false);
        let response = self.post(&body).await?;
        let wire: ClaudeResponse = super::json_body("claude", response).await?;

        Ok(completion(wire))
    }

    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError> {
        let body = self.body(messages, true);
        let response = self.post(&body).await?;

        let mut state = StreamState::default();

        Ok(Box::new(SseStream::new("claude", response, move |event: &Event| {
            match super::parse_event::<ClaudeStreamEvent>("claude", &event.data) {
                Some(event) => state.frame(event),
                None => Ok(Frame::Deltas(Vec::new())),
            }
        })))
    }
}

fn tool_choice(choice: &ToolChoice) -> ClaudeToolChoice {
    let (choice_type, name) = match choice {
        ToolChoice::Mode(ToolChoiceMode::None) => ("none", None),
        ToolChoice::Mode(ToolChoiceMode::Auto) => ("auto", None),
        ToolChoice::Mode(ToolChoiceMode::Required) => ("any", None),
        ToolChoice::Function { function, .. } => ("tool", Some(function.name.clone())),
    };

    ClaudeToolChoice { choice_type, name }
}

/// Split out the system prompt and fold the rest into alternating turns
///
/// Tool results travel as user turns, so consecutive same-role messages are
/// merged into one turn.
fn wire_messages(messages: Vec<ProviderMessage>) -> (Option<String>, Vec<ClaudeMessage>) {
    let mut system: Vec<String> = Vec::new();
    let mut turns: Vec<ClaudeMessage> = Vec::new();

    for message in messages {
        let (role, blocks) = match message.role {
            Role::System => {
                system.push(message.text());
                continue;
            }
            Role::Tool => {
                let content = message.text();
                (
                    "user",
                    vec![ClaudeContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.unwrap_or_default(),
                        content,
                    }],
                )
            }
            Role::User => ("user", message.content.into_iter().filter_map(wire_part).collect()),
            Role::Assistant => {
                let mut blocks: Vec<ClaudeContentBlock> = message
                    .content
                    .into_iter()
                    .filter(|part| !matches!(part, ProviderPart::Text(text) if text.is_empty()))
                    .filter_map(wire_part)
                    .collect();

                for call in message.tool_calls.unwrap_or_default() {
                    blocks.push(ClaudeContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| serde_json::json!({})),
                    });
                }

                ("assistant", blocks)
            }
        };

        match turns.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => turns.push(ClaudeMessage {
                role: role.to_owned(),
                content: blocks,
            }),
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

fn wire_part(part: ProviderPart) -> Option<ClaudeContentBlock> {
    match part {
        ProviderPart::Text(text) => Some(ClaudeContentBlock::Text { text }),
        ProviderPart::InlineData(data) => media_block(data),
    }
}

fn media_block(data: InlineData) -> Option<ClaudeContentBlock> {
    match data.kind {
        MediaKind::Image => Some(ClaudeContentBlock::Image {
            source: ClaudeSource::base64(data.mime_type, data.data),
        }),
        MediaKind::File if data.mime_type == "application/pdf" => Some(ClaudeContentBlock::Document {
            source: ClaudeSource::base64(data.mime_type, data.data),
        }),
        kind => {
            tracing::warn!(kind = kind.as_str(), mime_type = %data.mime_type, "claude does not accept this media, dropping part");
            None
        }
    }
}

fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

const fn usage(wire: ClaudeUsage) -> Usage {
    Usage::new(wire.input_tokens, wire.output_tokens)
}

fn completion(wire: ClaudeResponse) -> ChatCompletion {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in wire.content {
        match block {
            ClaudeResponseBlock::Text { text: fragment } => text.push_str(&fragment),
            ClaudeResponseBlock::Thinking { thinking } => reasoning.push_str(&thinking),
            ClaudeResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::function(id, name, input.to_string()));
            }
            ClaudeResponseBlock::Other => {}
        }
    }

    let message = ChoiceMessage {
        role: Role::Assistant,
        content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    };

    let mut completion = ChatCompletion::single(
        wire.model,
        message,
        wire.stop_reason.as_deref().map(finish_reason),
        usage(wire.usage),
    );
    if !wire.id.is_empty() {
        completion.id = wire.id;
    }
    completion
}

/// Block and usage bookkeeping across stream events
///
/// Content block indexes count text and thinking blocks too, so tool calls
/// get their own sequential index.
#[derive(Default)]
struct StreamState {
    input_tokens: u32,
    next_tool_call: u32,
    current_tool_call: Option<u32>,
}

impl StreamState {
    fn frame(&mut self, event: ClaudeStreamEvent) -> Result<Frame, LlmError> {
        let delta = match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                None
            }
            ClaudeStreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                ClaudeResponseBlock::ToolUse { id, name, .. } => {
                    let index = self.next_tool_call;
                    self.next_tool_call += 1;
                    self.current_tool_call = Some(index);
                    Some(StreamDelta {
                        tool_call: Some(StreamToolCall {
                            index,
                            id: Some(id),
                            call_type: Some("function".to_owned()),
                            function: Some(StreamFunctionCall {
                                name: Some(name),
                                arguments: None,
                            }),
                        }),
                        ..StreamDelta::default()
                    })
                }
                _ => {
                    self.current_tool_call = None;
                    None
                }
            },
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ClaudeStreamDelta::TextDelta { text } => Some(StreamDelta::text(text)),
                ClaudeStreamDelta::ThinkingDelta { thinking } => Some(StreamDelta {
                    reasoning_content: Some(thinking),
                    ..StreamDelta::default()
                }),
                ClaudeStreamDelta::InputJsonDelta { partial_json } => {
                    self.current_tool_call.map(|index| StreamDelta {
                        tool_call: Some(StreamToolCall {
                            index,
                            id: None,
                            call_type: None,
                            function: Some(StreamFunctionCall {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }),
                        ..StreamDelta::default()
                    })
                }
                ClaudeStreamDelta::Other => None,
            },
            ClaudeStreamEvent::MessageDelta { delta, usage } => Some(StreamDelta {
                finish_reason: delta.stop_reason.as_deref().map(finish_reason),
                usage: usage.map(|u| Usage::new(self.input_tokens, u.output_tokens)),
                ..StreamDelta::default()
            }),
            ClaudeStreamEvent::MessageStop => return Ok(Frame::Done),
            ClaudeStreamEvent::Error { error } => {
                tracing::error!(error_type = %error.error_type, message = %error.message, "claude stream error");
                return Err(LlmError::provider_call(
                    "claude",
                    format!("{}: {}", error.error_type, error.message),
                ));
            }
            ClaudeStreamEvent::Other => None,
        };

        Ok(Frame::Deltas(delta.into_iter().collect()))
    }
}
