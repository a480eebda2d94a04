//! Translation between the Anthropic Messages and `OpenAI` Chat Completions formats.
//!
//! Requests, responses, streaming chunks and upstream errors. Everything in
//! here is pure: no I/O, no shared state.

pub mod anthropic_types;
pub mod error_map;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
