//! AWS Bedrock client using the Converse API

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::Client;
use aws_sdk_bedrockruntime::primitives::event_stream::EventReceiver;
use aws_sdk_bedrockruntime::types::error::ConverseStreamOutputError;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole, ConverseOutput, ConverseStreamOutput,
    DocumentBlock, DocumentFormat, DocumentSource, ImageBlock, ImageFormat, ImageSource, InferenceConfiguration,
    Message as BedrockMessage, ReasoningContentBlock, ReasoningContentBlockDelta, SpecificToolChoice, StopReason,
    SystemContentBlock, Tool, ToolChoice as BedrockToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolSpecification, ToolUseBlock, TokenUsage,
};
use aws_smithy_types::{Blob, Document, Number};
use secrecy::{ExposeSecret, SecretString};

use super::{ProviderClient, ProviderStream};
use crate::LlmError;
use crate::normalize::{InlineData, ProviderMessage, ProviderPart};
use crate::types::{
    ChatCompletion, ChatRequest, ChoiceMessage, FinishReason, MediaKind, Role, StreamDelta, StreamFunctionCall,
    StreamToolCall, ToolCall, ToolChoice, ToolChoiceMode, ToolDefinition, Usage,
};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Decrypted credential material and transport overrides
pub struct BedrockSettings {
    pub access_key: SecretString,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
}

pub struct BedrockClient {
    sdk: Client,
    model: String,
    inference: InferenceConfiguration,
    tool_config: Option<ToolConfiguration>,
    additional_fields: Option<Document>,
}

impl BedrockClient {
    /// Build an SDK client from explicit credentials
    ///
    /// Explicit credentials always win over the ambient AWS provider chain.
    pub async fn connect(settings: BedrockSettings, request: &ChatRequest) -> Result<Self, LlmError> {
        let region = settings
            .region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());

        let credentials = Credentials::new(
            settings.access_key.expose_secret(),
            settings.secret_access_key.expose_secret(),
            settings.session_token.map(|t| t.expose_secret().to_owned()),
            None,
            "switchboard",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = settings.endpoint.filter(|e| !e.trim().is_empty()) {
            url::Url::parse(&endpoint)
                .map_err(|e| LlmError::client_construction("bedrock", format!("invalid endpoint {endpoint}: {e}")))?;
            loader = loader.endpoint_url(endpoint);
        }

        if let Some(timeout) = settings.timeout {
            loader = loader.timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        }

        let config = loader.load().await;

        Ok(Self {
            sdk: Client::new(&config),
            model: request.model.clone(),
            inference: inference_config(request),
            tool_config: tool_config(request)?,
            additional_fields: request
                .top_k()
                .map(|k| Document::Object(HashMap::from([("top_k".to_owned(), Document::Number(Number::PosInt(k.into())))]))),
        })
    }
}

#[async_trait]
impl ProviderClient for BedrockClient {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError> {
        let (system, messages) = converse_input(messages)?;

        let output = self
            .sdk
            .converse()
            .model_id(&self.model)
            .set_system(Some(system))
            .set_messages(Some(messages))
            .inference_config(self.inference.clone())
            .set_tool_config(self.tool_config.clone())
            .set_additional_model_request_fields(self.additional_fields.clone())
            .send()
            .await
            .map_err(|e| {
                let message = aws_sdk_bedrockruntime::error::DisplayErrorContext(&e).to_string();
                tracing::error!(provider = "bedrock", error = %message, "converse failed");
                LlmError::provider_call("bedrock", message)
            })?;

        let (content, reasoning, tool_calls) = match output.output() {
            Some(ConverseOutput::Message(message)) => response_content(message),
            _ => (String::new(), String::new(), Vec::new()),
        };

        let message = ChoiceMessage {
            role: Role::Assistant,
            content: (!content.is_empty() || tool_calls.is_empty()).then_some(content),
            reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        };

        Ok(ChatCompletion::single(
            self.model.clone(),
            message,
            Some(finish_reason(output.stop_reason())),
            output.usage().map(usage).unwrap_or_default(),
        ))
    }

    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError> {
        let (system, messages) = converse_input(messages)?;

        let output = self
            .sdk
            .converse_stream()
            .model_id(&self.model)
            .set_system(Some(system))
            .set_messages(Some(messages))
            .inference_config(self.inference.clone())
            .set_tool_config(self.tool_config.clone())
            .set_additional_model_request_fields(self.additional_fields.clone())
            .send()
            .await
            .map_err(|e| {
                let message = aws_sdk_bedrockruntime::error::DisplayErrorContext(&e).to_string();
                tracing::error!(provider = "bedrock", error = %message, "converse_stream failed");
                LlmError::provider_call("bedrock", message)
            })?;

        Ok(Box::new(BedrockStream {
            receiver: Some(output.stream),
            state: StreamState::default(),
        }))
    }
}

struct BedrockStream {
    receiver: Option<EventReceiver<ConverseStreamOutput, ConverseStreamOutputError>>,
    state: StreamState,
}

#[async_trait]
impl ProviderStream for BedrockStream {
    async fn recv(&mut self) -> Result<Option<StreamDelta>, LlmError> {
        loop {
            let Some(receiver) = self.receiver.as_mut() else {
                return Ok(None);
            };

            match receiver.recv().await {
                Ok(Some(event)) => {
                    if let Some(delta) = self.state.delta(event) {
                        return Ok(Some(delta));
                    }
                }
                Ok(None) => self.receiver = None,
                Err(e) => {
                    let message = aws_sdk_bedrockruntime::error::DisplayErrorContext(&e).to_string();
                    tracing::error!(provider = "bedrock", error = %message, "stream read failed");
                    self.receiver = None;
                    return Err(LlmError::provider_call("bedrock", message));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.receiver = None;
    }
}

/// Tool call numbering across stream events
///
/// Converse content block indexes count text blocks too.
#[derive(Default)]
struct StreamState {
    next_tool_call: u32,
    current_tool_call: Option<u32>,
}

impl StreamState {
    fn delta(&mut self, event: ConverseStreamOutput) -> Option<StreamDelta> {
        match event {
            ConverseStreamOutput::MessageStart(_) => Some(StreamDelta {
                role: Some(Role::Assistant),
                ..StreamDelta::default()
            }),
            ConverseStreamOutput::ContentBlockStart(start) => match start.start {
                Some(ContentBlockStart::ToolUse(tool)) => {
                    let index = self.next_tool_call;
                    self.next_tool_call += 1;
                    self.current_tool_call = Some(index);
                    Some(StreamDelta {
                        tool_call: Some(StreamToolCall {
                            index,
                            id: Some(tool.tool_use_id),
                            call_type: Some("function".to_owned()),
                            function: Some(StreamFunctionCall {
                                name: Some(tool.name),
                                arguments: None,
                            }),
                        }),
                        ..StreamDelta::default()
                    })
                }
                _ => None,
            },
            ConverseStreamOutput::ContentBlockDelta(delta) => match delta.delta {
                Some(ContentBlockDelta::Text(text)) => Some(StreamDelta::text(text)),
                Some(ContentBlockDelta::ReasoningContent(ReasoningContentBlockDelta::Text(text))) => Some(StreamDelta {
                    reasoning_content: Some(text),
                    ..StreamDelta::default()
                }),
                Some(ContentBlockDelta::ToolUse(tool)) => self.current_tool_call.map(|index| StreamDelta {
                    tool_call: Some(StreamToolCall {
                        index,
                        id: None,
                        call_type: None,
                        function: Some(StreamFunctionCall {
                            name: None,
                            arguments: Some(tool.input),
                        }),
                    }),
                    ..StreamDelta::default()
                }),
                _ => None,
            },
            ConverseStreamOutput::ContentBlockStop(_) => {
                self.current_tool_call = None;
                None
            }
            ConverseStreamOutput::MessageStop(stop) => Some(StreamDelta::finish(finish_reason(&stop.stop_reason))),
            ConverseStreamOutput::Metadata(meta) => meta.usage.as_ref().map(|u| StreamDelta {
                usage: Some(usage(u)),
                ..StreamDelta::default()
            }),
            _ => None,
        }
    }
}

fn finish_reason(reason: &StopReason) -> FinishReason {
    match reason {
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFiltered | StopReason::GuardrailIntervened => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn usage(usage: &TokenUsage) -> Usage {
    Usage::new(
        super::token_count(usage.input_tokens()),
        super::token_count(usage.output_tokens()),
    )
}

#[allow(clippy::cast_possible_truncation)]
fn inference_config(request: &ChatRequest) -> InferenceConfiguration {
    let params = &request.params;

    InferenceConfiguration::builder()
        .set_temperature(params.temperature.map(|t| t as f32))
        .set_top_p(params.top_p.map(|p| p as f32))
        .set_max_tokens(params.max_tokens.map(|m| i32::try_from(m).unwrap_or(i32::MAX)))
        .set_stop_sequences(params.stop.clone())
        .build()
}

fn tool_config(request: &ChatRequest) -> Result<Option<ToolConfiguration>, LlmError> {
    let tools = request.unique_tools();
    if tools.is_empty() || matches!(request.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::None))) {
        return Ok(None);
    }

    let specs = tools.iter().map(tool_spec).collect::<Result<Vec<_>, _>>()?;

    let choice = match &request.tool_choice {
        Some(ToolChoice::Mode(ToolChoiceMode::Required)) => Some(BedrockToolChoice::Any(
            aws_sdk_bedrockruntime::types::AnyToolChoice::builder().build(),
        )),
        Some(ToolChoice::Function { function, .. }) => Some(BedrockToolChoice::Tool(
            SpecificToolChoice::builder()
                .name(&function.name)
                .build()
                .map_err(|e| LlmError::InvalidRequest(format!("invalid tool choice: {e}")))?,
        )),
        _ => None,
    };

    ToolConfiguration::builder()
        .set_tools(Some(specs))
        .set_tool_choice(choice)
        .build()
        .map(Some)
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool configuration: {e}")))
}

fn tool_spec(tool: &ToolDefinition) -> Result<Tool, LlmError> {
    let schema = tool
        .function
        .parameters
        .as_ref()
        .map_or_else(|| Document::Object(HashMap::new()), value_to_document);

    ToolSpecification::builder()
        .name(&tool.function.name)
        .set_description(tool.function.description.clone())
        .input_schema(ToolInputSchema::Json(schema))
        .build()
        .map(Tool::ToolSpec)
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool `{}`: {e}", tool.function.name)))
}

/// Split system prompts from turns; tool results become user turns
fn converse_input(messages: Vec<ProviderMessage>) -> Result<(Vec<SystemContentBlock>, Vec<BedrockMessage>), LlmError> {
    let mut system = Vec::new();
    let mut turns: Vec<BedrockMessage> = Vec::new();
    let mut documents = 0usize;

    for message in messages {
        let (role, blocks) = match message.role {
            Role::System => {
                system.push(SystemContentBlock::Text(message.text()));
                continue;
            }
            Role::Tool => {
                let result = ToolResultBlock::builder()
                    .tool_use_id(message.tool_call_id.clone().unwrap_or_default())
                    .content(ToolResultContentBlock::Text(message.text()))
                    .build()
                    .map_err(|e| LlmError::InvalidRequest(format!("invalid tool result: {e}")))?;
                (ConversationRole::User, vec![ContentBlock::ToolResult(result)])
            }
            Role::User | Role::Assistant => {
                let role = if message.role == Role::User {
                    ConversationRole::User
                } else {
                    ConversationRole::Assistant
                };

                let mut blocks = Vec::new();
                for part in message.content {
                    match part {
                        ProviderPart::Text(text) if text.is_empty() => {}
                        ProviderPart::Text(text) => blocks.push(ContentBlock::Text(text)),
                        ProviderPart::InlineData(data) => {
                            if let Some(block) = media_block(&data, &mut documents)? {
                                blocks.push(block);
                            }
                        }
                    }
                }

                for call in message.tool_calls.unwrap_or_default() {
                    let input = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                        .unwrap_or_else(|_| serde_json::json!({}));
                    let tool_use = ToolUseBlock::builder()
                        .tool_use_id(call.id)
                        .name(call.function.name)
                        .input(value_to_document(&input))
                        .build()
                        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool call: {e}")))?;
                    blocks.push(ContentBlock::ToolUse(tool_use));
                }

                (role, blocks)
            }
        };

        if let Some(last) = turns.last_mut()
            && *last.role() == role
        {
            last.content.extend(blocks);
            continue;
        }

        let turn = BedrockMessage::builder()
            .role(role)
            .set_content(Some(blocks))
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("invalid message: {e}")))?;
        turns.push(turn);
    }

    // Converse rejects turns without content blocks
    for turn in &mut turns {
        if turn.content.is_empty() {
            turn.content.push(ContentBlock::Text(String::new()));
        }
    }

    Ok((system, turns))
}

fn media_block(data: &InlineData, documents: &mut usize) -> Result<Option<ContentBlock>, LlmError> {
    match data.kind {
        MediaKind::Image => {
            let format = match data.mime_type.as_str() {
                "image/png" => ImageFormat::Png,
                "image/gif" => ImageFormat::Gif,
                "image/webp" => ImageFormat::Webp,
                _ => ImageFormat::Jpeg,
            };

            ImageBlock::builder()
                .format(format)
                .source(ImageSource::Bytes(Blob::new(data.decode()?)))
                .build()
                .map(|block| Some(ContentBlock::Image(block)))
                .map_err(|e| LlmError::InvalidRequest(format!("invalid image: {e}")))
        }
        MediaKind::File => {
            let Some(format) = document_format(&data.mime_type) else {
                tracing::warn!(mime_type = %data.mime_type, "bedrock does not accept this document type, dropping part");
                return Ok(None);
            };

            *documents += 1;
            DocumentBlock::builder()
                .format(format)
                .name(document_name(data.filename.as_deref(), *documents))
                .source(DocumentSource::Bytes(Blob::new(data.decode()?)))
                .build()
                .map(|block| Some(ContentBlock::Document(block)))
                .map_err(|e| LlmError::InvalidRequest(format!("invalid document: {e}")))
        }
        kind => {
            tracing::warn!(kind = kind.as_str(), mime_type = %data.mime_type, "bedrock does not accept this media, dropping part");
            Ok(None)
        }
    }
}

fn document_format(mime_type: &str) -> Option<DocumentFormat> {
    Some(match mime_type {
        "application/pdf" => DocumentFormat::Pdf,
        "text/csv" => DocumentFormat::Csv,
        "text/html" => DocumentFormat::Html,
        "text/markdown" => DocumentFormat::Md,
        "text/plain" => DocumentFormat::Txt,
        "application/msword" => DocumentFormat::Doc,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => DocumentFormat::Docx,
        "application/vnd.ms-excel" => DocumentFormat::Xls,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => DocumentFormat::Xlsx,
        _ => return None,
    })
}

/// Converse document names allow only alphanumerics, single spaces, hyphens,
/// parentheses and square brackets
fn document_name(filename: Option<&str>, ordinal: usize) -> String {
    let stem = filename
        .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
        .unwrap_or_default();

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '(' | ')' | '[' | ']') {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        format!("document-{ordinal}")
    } else {
        cleaned
    }
}

fn response_content(message: &BedrockMessage) -> (String, String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in message.content() {
        match block {
            ContentBlock::Text(fragment) => text.push_str(fragment),
            ContentBlock::ReasoningContent(ReasoningContentBlock::ReasoningText(block)) => {
                reasoning.push_str(block.text());
            }
            ContentBlock::ToolUse(tool) => {
                tool_calls.push(ToolCall::function(
                    tool.tool_use_id(),
                    tool.name(),
                    document_to_value(tool.input()).to_string(),
                ));
            }
            _ => {}
        }
    }

    (text, reasoning, tool_calls)
}

fn value_to_document(value: &serde_json::Value) -> Document {
    match value {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                n.as_f64().map_or(Document::Null, |f| Document::Number(Number::Float(f)))
            }
        }
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(items) => Document::Array(items.iter().map(value_to_document).collect()),
        serde_json::Value::Object(map) => {
            Document::Object(map.iter().map(|(k, v)| (k.clone(), value_to_document(v))).collect())
        }
    }
}

fn document_to_value(document: &Document) -> serde_json::Value {
    match document {
        Document::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), document_to_value(v))).collect())
        }
        Document::Array(items) => serde_json::Value::Array(items.iter().map(document_to_value).collect()),
        Document::Number(Number::PosInt(u)) => serde_json::Value::from(*u),
        Document::Number(Number::NegInt(i)) => serde_json::Value::from(*i),
        Document::Number(Number::Float(f)) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Null => serde_json::Value::Null,
    }
}
