use serde::{Deserialize, Serialize};

use super::message::{Role, ToolCall};

/// Object tag of a synchronous response
pub const COMPLETION_OBJECT: &str = "chat.completion";

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map an `OpenAI`-style finish reason string
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Full assistant message of a synchronous choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: Role,
    pub content: Option<String>,
    /// Reasoning trace for models that expose one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChoiceMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: Option<FinishReason>,
}

/// Normalized synchronous response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    /// Unix seconds
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatCompletion {
    /// Single-choice response with a fresh id and timestamp
    pub fn single(model: impl Into<String>, message: ChoiceMessage, finish_reason: Option<FinishReason>, usage: Usage) -> Self {
        Self {
            id: super::completion_id(),
            object: COMPLETION_OBJECT.to_owned(),
            created: super::unix_now(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage,
        }
    }

    /// Fill the envelope fields a vendor left blank
    #[must_use]
    pub fn normalized(mut self, requested_model: &str) -> Self {
        if self.id.is_empty() {
            self.id = super::completion_id();
        }
        if self.created == 0 {
            self.created = super::unix_now();
        }
        if self.model.is_empty() {
            requested_model.clone_into(&mut self.model);
        }
        COMPLETION_OBJECT.clone_into(&mut self.object);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let mut response = ChatCompletion::single(
            "gpt-4o",
            ChoiceMessage::assistant("Hello"),
            Some(FinishReason::Stop),
            Usage::new(3, 2),
        );
        response.id = "chatcmpl-1".into();
        response.created = 1_700_000_000;

        insta::assert_json_snapshot!(response, @r#"
        {
          "id": "chatcmpl-1",
          "object": "chat.completion",
          "created": 1700000000,
          "model": "gpt-4o",
          "choices": [
            {
              "index": 0,
              "message": {
                "role": "assistant",
                "content": "Hello"
              },
              "finish_reason": "stop"
            }
          ],
          "usage": {
            "prompt_tokens": 3,
            "completion_tokens": 2,
            "total_tokens": 5
          }
        }
        "#);
    }

    #[test]
    fn normalized_fills_blank_envelope() {
        let response = ChatCompletion {
            id: String::new(),
            object: "anything".into(),
            created: 0,
            model: String::new(),
            choices: vec![],
            usage: Usage::default(),
        }
        .normalized("claude-x");

        assert!(response.id.starts_with("chatcmpl-"));
        assert_eq!(response.object, "chat.completion");
        assert!(response.created > 0);
        assert_eq!(response.model, "claude-x");
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_openai("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_openai("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_openai("weird"), FinishReason::Stop);
    }
}
