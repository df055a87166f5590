//! Canonical, vendor-independent request and response types
//!
//! Requests arrive in this shape regardless of the target vendor, and every
//! vendor's output is normalized back into it.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{FunctionCall, MediaKind, MediaPart, Message, Part, Role, ToolCall};
pub use request::{ChatRequest, SamplingParams};
pub use response::{ChatCompletion, Choice, ChoiceMessage, FinishReason, Usage};
pub use stream::{ChatCompletionChunk, ChunkChoice, ChunkDelta, StreamDelta, StreamFunctionCall, StreamToolCall};
pub use tool::{FunctionDefinition, ToolChoice, ToolChoiceMode, ToolDefinition};

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Fresh completion identifier in the `chatcmpl-` namespace
pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
