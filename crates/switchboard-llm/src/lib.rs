//! Multi-vendor chat completion dispatch
//!
//! Accepts one canonical, OpenAI-shaped chat request, resolves an encrypted
//! vendor credential for the active environment and forwards the request to
//! `OpenAI`, Azure `OpenAI`, `DeepSeek`, Claude, Gemini or AWS Bedrock. Responses
//! come back in the canonical completion shape, or as server-sent events for
//! streaming requests.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod bridge;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod protocol;
pub mod provider;
pub mod sse;
pub mod types;
pub mod vendor;

pub use bridge::ChunkStream;
pub use credentials::CredentialStore;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::LlmError;
pub use normalize::MessageNormalizer;
pub use provider::{ProviderClient, ProviderStream};
pub use types::{ChatCompletion, ChatCompletionChunk, ChatRequest, Message, Role};
pub use vendor::{Vendor, VendorAdapter, VendorRegistry};
