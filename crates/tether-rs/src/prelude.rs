//! Convenience re-exports for common `tether-rs` types.
//!
//! ```ignore
//! use tether_rs::prelude::*;
//! ```
//!
//! Stream framing internals ([`Frame`](crate::api::Frame)) and the error
//! classifier stay in [`api`](crate::api).

// ── Client ──────────────────────────────────────────────────────────
pub use crate::{ApiType, Client, ClientConfig};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::api::{ApiRequest, ApiResponse, RateLimitHeaders, RetryPolicy, StreamReader};
pub use tokio_util::sync::CancellationToken;

// ── Chat ────────────────────────────────────────────────────────────
pub use crate::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStream,
    ChatCompletionStreamResponse, ChatMessage, Role, collect_content,
};
pub use crate::models::{self, Model, ModelsList};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ApiError, Error, Result};
