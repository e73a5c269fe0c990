//! Model listing and common model names.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::Client;
use crate::api::ApiResponse;
use crate::error::Result;

// ── Model names ────────────────────────────────────────────────────

pub const GPT4O: &str = "gpt-4o";
pub const GPT4O_2024_05_13: &str = "gpt-4o-2024-05-13";
pub const GPT4O_MINI: &str = "gpt-4o-mini";
pub const GPT4_TURBO: &str = "gpt-4-turbo";
pub const GPT4_TURBO_2024_04_09: &str = "gpt-4-turbo-2024-04-09";
pub const GPT4_TURBO_PREVIEW: &str = "gpt-4-turbo-preview";
pub const GPT4: &str = "gpt-4";
pub const GPT4_32K: &str = "gpt-4-32k";
pub const GPT35_TURBO: &str = "gpt-3.5-turbo";
pub const GPT35_TURBO_0125: &str = "gpt-3.5-turbo-0125";
pub const GPT35_TURBO_16K: &str = "gpt-3.5-turbo-16k";
pub const GPT35_TURBO_INSTRUCT: &str = "gpt-3.5-turbo-instruct";

// ── Types ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default, rename = "created")]
    pub created_at: i64,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Models visible to the caller's key or organization.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ModelsList {
    #[serde(rename = "data")]
    pub models: Vec<Model>,
}

impl Client {
    /// List the currently available models.
    pub async fn list_models(&self) -> Result<ApiResponse<ModelsList>> {
        let request = self.new_request(Method::GET, "/models", None)?;
        self.send(request, &[]).await
    }
}
