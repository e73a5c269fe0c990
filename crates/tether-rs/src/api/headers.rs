//! Response headers: the [`ApiResponse`] wrapper for buffered results and
//! rate-limit header parsing.

use std::ops::Deref;
use std::time::Duration;

use reqwest::header::HeaderMap;

/// A decoded response body together with the response headers.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    pub fn into_inner(self) -> T {
        self.body
    }

    pub fn rate_limits(&self) -> RateLimitHeaders {
        RateLimitHeaders::from_headers(&self.headers)
    }
}

impl<T> Deref for ApiResponse<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.body
    }
}

/// Rate-limit information reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    /// Raw reset values, e.g. `"1s"` or `"6m0s"`.
    pub reset_requests: Option<String>,
    pub reset_tokens: Option<String>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };
        let number = |name: &str| text(name).and_then(|s| s.parse().ok());

        Self {
            limit_requests: number("x-ratelimit-limit-requests"),
            limit_tokens: number("x-ratelimit-limit-tokens"),
            remaining_requests: number("x-ratelimit-remaining-requests"),
            remaining_tokens: number("x-ratelimit-remaining-tokens"),
            reset_requests: text("x-ratelimit-reset-requests"),
            reset_tokens: text("x-ratelimit-reset-tokens"),
        }
    }

    /// Time until the request budget resets.
    pub fn reset_requests_after(&self) -> Option<Duration> {
        self.reset_requests.as_deref().and_then(parse_reset)
    }

    /// Time until the token budget resets.
    pub fn reset_tokens_after(&self) -> Option<Duration> {
        self.reset_tokens.as_deref().and_then(parse_reset)
    }
}

/// Parse durations in the `1h2m3.5s` / `250ms` form used by reset headers.
fn parse_reset(value: &str) -> Option<Duration> {
    let mut total = 0f64;
    let mut number = String::new();
    let mut chars = value.chars().peekable();
    let mut seen_unit = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let amount: f64 = number.parse().ok()?;
        number.clear();
        let seconds = match c {
            'h' => amount * 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                amount / 1000.0
            }
            'm' => amount * 60.0,
            's' => amount,
            _ => return None,
        };
        total += seconds;
        seen_unit = true;
    }

    // Trailing digits without a unit are not a valid duration.
    if !number.is_empty() || !seen_unit {
        return None;
    }
    Some(Duration::from_secs_f64(total))
}
