use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn
///
/// Exactly one of `content` and `parts` is populated; [`Message::validate`]
/// enforces this before a request leaves the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Plain text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Ordered multimodal content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Part>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Plain text message
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            parts: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Multimodal message
    pub fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            content: None,
            parts: Some(parts),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Check the content/parts exclusivity
    ///
    /// Assistant turns that only carry tool calls may omit both.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.content, &self.parts) {
            (Some(_), Some(_)) => Err(format!("{} message has both content and parts", self.role)),
            (None, None) if self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty()) => Ok(()),
            (None, None) => Err(format!("{} message has neither content nor parts", self.role)),
            (None, Some(parts)) if parts.is_empty() => Err(format!("{} message has an empty parts list", self.role)),
            _ => Ok(()),
        }
    }
}

/// Typed piece of a multimodal message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Image(MediaPart),
    Audio(MediaPart),
    Video(MediaPart),
    File(MediaPart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::Image(MediaPart::new(url))
    }

    pub const fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Media kind and payload, or `None` for text
    pub const fn media(&self) -> Option<(MediaKind, &MediaPart)> {
        match self {
            Self::Text { .. } => None,
            Self::Image(media) => Some((MediaKind::Image, media)),
            Self::Audio(media) => Some((MediaKind::Audio, media)),
            Self::Video(media) => Some((MediaKind::Video, media)),
            Self::File(media) => Some((MediaKind::File, media)),
        }
    }
}

/// Media reference: a remote `http(s)` URL or a `data:` URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPart {
    pub url: String,
    /// Explicit MIME type, skipping detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Image detail hint ("auto", "low", "high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl MediaPart {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            detail: None,
            filename: None,
        }
    }
}

/// Kind of media carried by a [`Part`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name and JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

pub(crate) fn function_type() -> String {
    "function".to_owned()
}
