//! Upstream-facing routing: model resolution, streaming chat adapters, the
//! face-swap job driver and the one-shot adapters.

pub mod chat;
pub mod error;
pub mod faceswap;
pub mod models;
pub mod oneshot;
pub mod sse;
pub mod upstream;
