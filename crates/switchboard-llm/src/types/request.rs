use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::message::Message;
use super::tool::{ToolChoice, ToolDefinition};

/// Sampling parameters shared by every vendor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences; a single string is accepted as a one-element list
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Canonical chat-completion request
///
/// The JSON shape is the `OpenAI` chat request plus a `provider` selector and
/// an `extra` bag for vendor-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Vendor to dispatch to; the dispatcher default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub params: SamplingParams,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Vendor-specific options (`top_k`, `response_format`, `user`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            provider: None,
            model: model.into(),
            messages,
            params: SamplingParams::default(),
            stream: false,
            tools: None,
            tool_choice: None,
            extra: None,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub const fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Check the request invariants without touching any vendor
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_owned());
        }

        if self.messages.is_empty() {
            return Err("messages must not be empty".to_owned());
        }

        for (index, message) in self.messages.iter().enumerate() {
            message.validate().map_err(|e| format!("messages[{index}]: {e}"))?;
        }

        Ok(())
    }

    /// Look up a vendor-specific option
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.as_ref().and_then(|extra| extra.get(key))
    }

    /// `top_k` from the extension bag, for vendors that support it
    pub fn top_k(&self) -> Option<u32> {
        self.extra("top_k")
            .and_then(Value::as_u64)
            .and_then(|k| u32::try_from(k).ok())
    }

    /// Tool definitions with duplicate function names removed, first one wins
    pub fn unique_tools(&self) -> Vec<ToolDefinition> {
        self.tools.as_deref().map(super::tool::dedup_by_name).unwrap_or_default()
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(stop)) => Some(vec![stop]),
        Some(OneOrMany::Many(stops)) => Some(stops),
    })
}
