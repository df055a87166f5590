//! Vendor wire formats
//!
//! Plain serde structs matching each vendor's JSON API. They only exist at the
//! HTTP boundary; provider clients convert to and from the canonical types.

pub mod claude;
pub mod gemini;
pub mod openai;
