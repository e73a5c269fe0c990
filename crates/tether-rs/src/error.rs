//! Error types shared by the dispatcher, the stream reader and the endpoints.
//!
//! Every outcome the caller has to tell apart is its own variant: transport
//! failures, classified status failures, exhausted retry budgets,
//! cancellation, malformed payloads and the stream-specific failures.
//! Reaching the end of a stream is *not* an error; readers signal it with
//! `Ok(None)`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structured error returned by the API, either as the body of a failed
/// response or in-band inside an event stream.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Error code. Providers send either a string or a number here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<serde_json::Value>,
    /// HTTP status of the response this error was decoded from. Not part of
    /// the wire format; filled in by the classifier.
    #[serde(skip)]
    pub status: Option<u16>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status code {status}, message: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The `{"error": {...}}` envelope wrapping an [`ApiError`].
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// Errors produced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be sent, or no response was obtained.
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    /// A failure status whose body decoded into a structured API error.
    #[error("API error: {0}")]
    Api(ApiError),

    /// A failure status whose body was not a structured API error.
    #[error("HTTP {status}: {body}")]
    Request { status: u16, body: String },

    /// Every attempt in the retry budget failed. `last` describes the most
    /// recent failure; the full trail goes to the log.
    #[error("request exceeded retry limits after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The caller's cancellation token fired during a send or a backoff wait.
    #[error("request cancelled")]
    Cancelled,

    /// A response body or stream frame did not decode into the expected type.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The stream produced more consecutive non-data lines than allowed.
    #[error("stream has sent too many empty messages (limit {limit})")]
    TooManyEmptyMessages { limit: usize },

    /// The stream carried an in-band error payload.
    #[error("stream error: {0}")]
    Stream(ApiError),

    /// Reading the stream body failed.
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The request could not be built (body serialization, bad header, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client configuration is incomplete or unusable.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(err) => err.status,
            Error::Request { status, .. } => Some(*status),
            Error::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The structured API error carried by this error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) | Error::Stream(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_accepts_string_or_numeric_code() {
        let s: ErrorResponse =
            serde_json::from_str(r#"{"error":{"message":"m","code":"rate_limit"}}"#).unwrap();
        assert_eq!(s.error.unwrap().code, Some(serde_json::json!("rate_limit")));

        let n: ErrorResponse =
            serde_json::from_str(r#"{"error":{"message":"m","code":429}}"#).unwrap();
        assert_eq!(n.error.unwrap().code, Some(serde_json::json!(429)));
    }

    #[test]
    fn status_is_reported_for_classified_errors() {
        let api = Error::Api(ApiError {
            message: "quota".into(),
            status: Some(429),
            ..Default::default()
        });
        assert_eq!(api.status(), Some(429));

        let raw = Error::Request {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(raw.status(), Some(502));
        assert_eq!(Error::Cancelled.status(), None);
    }

    #[test]
    fn display_includes_status_and_message() {
        let err = Error::Api(ApiError {
            message: "model not found".into(),
            status: Some(404),
            ..Default::default()
        });
        assert_eq!(
            err.to_string(),
            "API error: status code 404, message: model not found"
        );
    }
}
