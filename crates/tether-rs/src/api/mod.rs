//! Transport layer: dispatch with retries, stream reading, error
//! classification and response headers.
//!
//! - [`dispatch`]: [`ApiRequest`] and the attempt loop behind
//!   [`Client::send`](crate::Client::send) and
//!   [`Client::send_stream`](crate::Client::send_stream).
//! - [`retry`]: [`RetryPolicy`] merging, eligibility and jittered backoff.
//! - [`streaming`]: [`StreamReader`] over `data:`-framed event streams.
//! - [`classify`]: failed responses into [`Error`](crate::Error) values.
//! - [`headers`]: [`ApiResponse`] and rate-limit headers.

pub mod classify;
pub mod dispatch;
pub mod headers;
pub mod retry;
pub mod streaming;

pub use classify::classify;
pub use dispatch::ApiRequest;
pub use headers::{ApiResponse, RateLimitHeaders};
pub use retry::RetryPolicy;
pub use streaming::{Frame, StreamReader};
