//! Chat completion types and endpoint wrappers.
//!
//! The wrappers only build an [`ApiRequest`] and hand it to the dispatcher.
//! Callers that need a cancellation token or extra headers can build the
//! request with [`Client::chat_completion_request`] and send it themselves.

use futures::{Stream, TryStreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::Client;
use crate::api::{ApiRequest, ApiResponse, RetryPolicy, StreamReader};
use crate::error::{Error, Result};

const CHAT_COMPLETIONS_SUFFIX: &str = "/chat/completions";

/// Stream of chat completion deltas.
pub type ChatCompletionStream = StreamReader<ChatCompletionStreamResponse>;

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unset optional fields are omitted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// Function-calling tool definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// A tool call returned by the model. In stream deltas only `index` is
/// guaranteed; the other fields arrive in pieces.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub call_type: String,
    #[serde(default)]
    pub function: FunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    #[serde(other)]
    Unknown,
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatCompletionResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One decoded stream frame.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatCompletionStreamResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatCompletionStreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionStreamResponse {
    /// Concatenated text deltas of every choice in this frame.
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatCompletionStreamChoice {
    pub index: u32,
    #[serde(default)]
    pub delta: ChatCompletionStreamChoiceDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatCompletionStreamChoiceDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

// ── Endpoints ──────────────────────────────────────────────────────

impl Client {
    /// Build the request for `/chat/completions` without sending it. The
    /// `stream` flag of the body is set to `stream`.
    pub fn chat_completion_request(
        &self,
        mut request: ChatCompletionRequest,
        stream: bool,
    ) -> Result<ApiRequest> {
        request.stream = stream;
        self.new_request(Method::POST, CHAT_COMPLETIONS_SUFFIX, Some(&request.model))?
            .json(&request)
    }

    /// Create a chat completion. Fails with [`Error::InvalidRequest`] when
    /// `request.stream` is set; use
    /// [`create_chat_completion_stream`](Self::create_chat_completion_stream).
    pub async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
        retry: &[RetryPolicy],
    ) -> Result<ApiResponse<ChatCompletionResponse>> {
        if request.stream {
            return Err(Error::InvalidRequest(
                "streaming requests must use create_chat_completion_stream".into(),
            ));
        }
        let request = self.chat_completion_request(request, false)?;
        self.send(request, retry).await
    }

    /// Create a streamed chat completion. `headers` are appended to the
    /// request as-is.
    pub async fn create_chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
        headers: &[(&str, &str)],
        retry: &[RetryPolicy],
    ) -> Result<ChatCompletionStream> {
        let mut request = self.chat_completion_request(request, true)?;
        for (name, value) in headers {
            request = request.append_header(name, value)?;
        }
        self.send_stream(request, retry).await
    }
}

/// Drain a chat stream and join its text deltas.
pub async fn collect_content(stream: ChatCompletionStream) -> Result<String> {
    collect_stream_content(stream.into_stream()).await
}

async fn collect_stream_content<S>(stream: S) -> Result<String>
where
    S: Stream<Item = Result<ChatCompletionStreamResponse>>,
{
    stream
        .try_fold(String::new(), |mut acc, chunk| async move {
            acc.push_str(&chunk.content());
            Ok(acc)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn frame(content: &str) -> ChatCompletionStreamResponse {
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

    fn reader(body: String) -> ChatCompletionStream {
        StreamReader::new(std::io::Cursor::new(body.into_bytes()), 300, HeaderMap::new())
    }

    #[test]
    fn request_omits_unset_fields() {
        let req = ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn stream_flag_is_serialized_when_set() {
        let client = Client::new("k").unwrap();
        let req = ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        let api_req = client.chat_completion_request(req, true).unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(api_req.body_bytes().unwrap()).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(api_req.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = ChatMessage::tool("call_1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.content.as_deref(), Some("42"));
    }

    #[test]
    fn unknown_finish_reason_is_tolerated() {
        let reason: FinishReason = serde_json::from_str(r#""something_new""#).unwrap();
        assert_eq!(reason, FinishReason::Unknown);
        let reason: FinishReason = serde_json::from_str(r#""tool_calls""#).unwrap();
        assert_eq!(reason, FinishReason::ToolCalls);
    }

    #[test]
    fn response_content_reads_first_choice() {
        let resp: ChatCompletionResponse = serde_json::from_str(
            r#"{"id":"c1","object":"chat.completion","created":1,"model":"m",
                "choices":[{"index":0,"message":{"role":"assistant","content":"hey"},
                "finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(resp.content(), Some("hey"));
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn create_chat_completion_rejects_stream_requests() {
        let client = Client::new("k").unwrap();
        let mut req = ChatCompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        req.stream = true;
        let err = client.create_chat_completion(req, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn frames_written_to_the_wire_decode_back_unchanged() {
        let frames = vec![frame("Hel"), frame("lo, "), frame("wörld")];
        let mut body = String::new();
        for f in &frames {
            body.push_str("data: ");
            body.push_str(&serde_json::to_string(f).unwrap());
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");

        let mut stream = reader(body);
        let mut decoded = Vec::new();
        while let Some(chunk) = stream.next().await.unwrap() {
            decoded.push(chunk);
        }
        assert_eq!(decoded, frames);
    }

    #[tokio::test]
    async fn collect_content_joins_deltas() {
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            serde_json::to_string(&frame("Hello ")).unwrap(),
            serde_json::to_string(&frame("world")).unwrap(),
        );
        assert_eq!(collect_content(reader(body)).await.unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn collect_content_surfaces_stream_errors() {
        let body = format!(
            "data: {}\n\ndata: {{\"error\":{{\"message\":\"boom\"}}}}\n\n",
            serde_json::to_string(&frame("partial")).unwrap(),
        );
        let err = collect_content(reader(body)).await.unwrap_err();
        assert!(matches!(err, Error::Stream(ref e) if e.message == "boom"));
    }
}
