//! Turns failed HTTP responses into domain errors.
//!
//! A body shaped like `{"error": {"message": ...}}` with a non-empty message
//! becomes [`Error::Api`] carrying the status code. Anything else (HTML error
//! pages, plain text, empty bodies) becomes [`Error::Request`] wrapping the
//! raw text. Classification never fails.

use reqwest::StatusCode;

use crate::error::{ApiError, Error, ErrorResponse};

/// Classify a failure status and its body into an [`Error`].
pub fn classify(status: StatusCode, body: &[u8]) -> Error {
    if let Some(mut err) = decode_error_envelope(body) {
        err.status = Some(status.as_u16());
        return Error::Api(err);
    }

    Error::Request {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

/// Read the whole body of a failed response and classify it. A body that
/// cannot be read is treated as empty.
pub(crate) async fn classify_response(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or_default();
    classify(status, &body)
}

/// Decode an error envelope, returning the inner error only when it carries
/// a non-empty message.
pub(crate) fn decode_error_envelope(bytes: &[u8]) -> Option<ApiError> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice::<ErrorResponse>(bytes)
        .ok()?
        .error
        .filter(|err| !err.message.is_empty())
}
