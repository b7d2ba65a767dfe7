//! Clients for third-party 3D generation services.
//!
//! Provides a single [`GenerationProvider`](provider::GenerationProvider)
//! contract with two implementations: Meshy (submit + status polling) and a
//! Hugging Face Space behind a Gradio queue (upload + queue join + server-sent
//! event stream). Also exposes the SSE state machine and typed Gradio queue
//! messages used by the streaming client.

pub mod config;
pub mod gradio;
pub mod http;
pub mod meshy;
pub mod messages;
pub mod processor;
pub mod provider;
pub mod sse;
