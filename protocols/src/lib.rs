//! Wire types shared by the assistant gateway.
//!
//! - [`assistant`]: the client-facing contract (`{action, payload}` envelope,
//!   conversation turns, attachments, normalized stream events, responses).
//! - [`google`]: the native multimodal upstream wire (Gemini `generateContent`,
//!   Imagen `predict`, Cloud Text-to-Speech).
//! - [`chat`]: the OpenAI-compatible chat completions and image wire.
//! - [`validated`]: an axum extractor that deserializes, normalizes and validates.

pub mod assistant;
pub mod chat;
pub mod google;
pub mod validated;
