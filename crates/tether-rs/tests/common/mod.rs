//! Scripted HTTP server for integration tests.
//!
//! Each request pops the next scripted reply; once the script runs out the
//! last reply repeats. Every request is recorded for later assertions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, stream};
use tether_rs::chat::{
    ChatCompletionStreamChoice, ChatCompletionStreamChoiceDelta, ChatCompletionStreamResponse,
};
use tether_rs::{Client, ClientConfig};

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    /// Send `body`, then keep the connection open without finishing.
    pub stall: bool,
}

impl Reply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: body.into(),
            stall: false,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            content_type: "text/plain",
            ..Self::json(status, body)
        }
    }

    pub fn event_stream(body: impl Into<String>) -> Self {
        Self {
            content_type: "text/event-stream",
            ..Self::json(200, body)
        }
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Default)]
pub struct Script {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl Script {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            *last = Some(reply);
        }
        last.clone().unwrap_or_else(|| Reply::text(500, "script is empty"))
    }
}

async fn handle(
    State(script): State<Arc<Script>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    script.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        headers,
        body,
    });

    let Reply {
        status,
        content_type,
        headers: extra_headers,
        body,
        stall,
    } = script.next_reply();
    let body = if stall {
        let first = stream::once(async move { Ok::<_, io::Error>(Bytes::from(body)) });
        Body::from_stream(first.chain(stream::pending()))
    } else {
        Body::from(body)
    };
    let mut resp = (
        StatusCode::from_u16(status).unwrap(),
        [("content-type", content_type)],
        body,
    )
        .into_response();
    for (name, value) in extra_headers {
        resp.headers_mut()
            .insert(name, HeaderValue::from_str(&value).unwrap());
    }
    resp
}

/// Spawn a server on a random port and return its script and a client whose
/// base URL points at it.
pub async fn spawn(replies: Vec<Reply>) -> (Arc<Script>, Client) {
    spawn_with(replies, |config| config).await
}

pub async fn spawn_with(
    replies: Vec<Reply>,
    configure: impl FnOnce(ClientConfig) -> ClientConfig,
) -> (Arc<Script>, Client) {
    let script = Arc::new(Script {
        replies: Mutex::new(replies.into()),
        ..Default::default()
    });
    let app = Router::new().fallback(handle).with_state(script.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ClientConfig::new("sk-test").with_base_url(format!("http://{addr}/v1"));
    let client = Client::with_config(configure(config)).unwrap();
    (script, client)
}

pub fn chunk(content: &str) -> ChatCompletionStreamResponse {
    ChatCompletionStreamResponse {
        id: "chatcmpl-1".into(),
        object: "chat.completion.chunk".into(),
        created: 1_700_000_000,
        model: "gpt-4o-mini".into(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamChoiceDelta {
                role: None,
                content: Some(content.into()),
                tool_calls: None,
            },
            finish_reason: None,
        }],
        usage: None,
    }
}

/// `data: <json>` line for `content`, followed by a blank separator.
pub fn data_line(content: &str) -> String {
    format!("data: {}\n\n", serde_json::to_string(&chunk(content)).unwrap())
}

pub const COMPLETION: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","created":1,
"model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"hi"},
"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#;
