//! Resilient client for OpenAI-compatible completion APIs.
//!
//! `tether-rs` sends requests with bounded, jittered retries and reads
//! Server-Sent-Events replies one payload at a time. The interesting parts
//! live in [`api`]:
//!
//! - [`Client::send`] / [`Client::send_stream`] run the attempt loop:
//!   transport failures retry immediately, retry-eligible statuses back off
//!   (`200ms * 2^n` plus jitter), everything else fails fast. A
//!   [`CancellationToken`](tokio_util::sync::CancellationToken) on the request
//!   aborts both the HTTP call and the backoff wait.
//! - [`StreamReader`](api::StreamReader) turns a `data:`-framed body into typed
//!   payloads, stops at `[DONE]`, surfaces in-band `{"error": ...}` frames and
//!   guards against endless keep-alive noise.
//!
//! # Getting started
//!
//! ```ignore
//! use tether_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> tether_rs::Result<()> {
//!     let client = Client::with_config(ClientConfig::from_env()?)?;
//!
//!     let request = ChatCompletionRequest::new(
//!         models::GPT4O_MINI,
//!         vec![ChatMessage::user("Say hello")],
//!     );
//!     let retry = RetryPolicy::with_retries(3).retry_on([429, 503]);
//!
//!     let mut stream = client
//!         .create_chat_completion_stream(request, &[], &[retry])
//!         .await?;
//!     while let Some(chunk) = stream.next().await? {
//!         print!("{}", chunk.content());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Dispatch and retry loop, backoff policy, stream reader, error classification |
//! | [`chat`] | Chat completion request/response types and endpoint wrappers |
//! | [`models`] | Model listing and model-name constants |
//! | [`config`] | [`ClientConfig`], API flavours, URL construction |
//! | [`error`] | [`Error`] and [`ApiError`] |

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod prelude;

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};

pub use api::{ApiRequest, ApiResponse, RetryPolicy, StreamReader};
pub use config::{ApiType, ClientConfig};
pub use error::{ApiError, Error, Result};

const AZURE_API_KEY_HEADER: &str = "api-key";
const ORGANIZATION_HEADER: &str = "openai-organization";

// ── Client ─────────────────────────────────────────────────────────

/// Async client for the completions API.
///
/// Immutable once built and cheap to clone. Use
/// [`with_api_key`](Self::with_api_key) to rotate credentials; the new client
/// shares the connection pool and in-flight requests keep their old key.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Client for the public OpenAI API with default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(api_key))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// A copy of this client using a different API key.
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        let mut config = (*self.config).clone();
        config.api_key = api_key.into();
        Self {
            http: self.http.clone(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api_key_and_base_url(&self) -> (&str, &str) {
        (&self.config.api_key, &self.config.base_url)
    }

    /// Start a request to `suffix` with the authentication headers for the
    /// configured API flavour. `model` selects the Azure deployment.
    pub fn new_request(
        &self,
        method: Method,
        suffix: &str,
        model: Option<&str>,
    ) -> Result<ApiRequest> {
        let mut request = ApiRequest::new(method, self.config.full_url(suffix, model));
        let key = &self.config.api_key;

        if self.config.api_type == ApiType::Azure {
            request = request.header(
                HeaderName::from_static(AZURE_API_KEY_HEADER),
                header_value(key)?,
            );
        } else if !key.is_empty() {
            request = request.header(AUTHORIZATION, header_value(&format!("Bearer {key}"))?);
        }
        if let Some(org) = &self.config.org_id {
            request = request.header(
                HeaderName::from_static(ORGANIZATION_HEADER),
                header_value(org)?,
            );
        }
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidRequest(format!("invalid credential header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}
