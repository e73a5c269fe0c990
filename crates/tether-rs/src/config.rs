//! Client configuration.
//!
//! [`ClientConfig`] is plain data with sensible defaults and `with_*`
//! builders. It is consumed by [`Client::with_config`](crate::Client::with_config)
//! and never mutated afterwards.

use std::collections::HashMap;
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::error::{Error, Result};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const AZURE_API_VERSION: &str = "2023-05-15";
pub const DEFAULT_EMPTY_MESSAGES_LIMIT: usize = 300;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const ORG_ID_ENV: &str = "OPENAI_ORG_ID";

/// Which flavour of the API the base URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiType {
    #[default]
    OpenAi,
    /// Azure OpenAI with `api-key` authentication.
    Azure,
    /// Azure OpenAI with Azure AD bearer tokens.
    AzureAd,
}

impl ApiType {
    pub fn is_azure(self) -> bool {
        matches!(self, ApiType::Azure | ApiType::AzureAd)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub org_id: Option<String>,
    pub api_type: ApiType,
    /// `api-version` query parameter for Azure. Default: `"2023-05-15"`.
    pub api_version: String,
    /// Model name to Azure deployment name. Models not listed map to their
    /// own name with `.` and `:` removed.
    pub azure_deployments: HashMap<String, String>,
    /// Consecutive non-data lines a stream may send. Default: `300`.
    pub empty_messages_limit: usize,
    /// Retry fragment applied to every call before per-call fragments.
    /// Default: single attempt.
    pub retry: RetryPolicy,
    /// Per-attempt timeout for buffered requests. Streams are not limited.
    /// Default: 120s.
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            org_id: None,
            api_type: ApiType::OpenAi,
            api_version: AZURE_API_VERSION.to_string(),
            azure_deployments: HashMap::new(),
            empty_messages_limit: DEFAULT_EMPTY_MESSAGES_LIMIT,
            retry: RetryPolicy::default(),
            timeout: Some(Duration::from_secs(120)),
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("tether-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Azure OpenAI with `api-key` authentication against `base_url`
    /// (e.g. `https://my-resource.openai.azure.com`).
    pub fn azure(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            api_type: ApiType::Azure,
            ..Default::default()
        }
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_ORG_ID`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var(BASE_URL_ENV)
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url;
        }
        config.org_id = std::env::var(ORG_ID_ENV).ok().filter(|s| !s.is_empty());
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_azure_deployment(
        mut self,
        model: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        self.azure_deployments
            .insert(model.into(), deployment.into());
        self
    }

    pub fn with_empty_messages_limit(mut self, limit: usize) -> Self {
        self.empty_messages_limit = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Azure deployment name for `model`.
    pub fn azure_deployment(&self, model: &str) -> String {
        if let Some(deployment) = self.azure_deployments.get(model) {
            return deployment.clone();
        }
        model.chars().filter(|c| !matches!(c, '.' | ':')).collect()
    }

    /// Full URL for an endpoint suffix such as `/chat/completions`. `model`
    /// selects the Azure deployment.
    pub fn full_url(&self, suffix: &str, model: Option<&str>) -> String {
        if !self.api_type.is_azure() {
            return format!("{}{suffix}", self.base_url);
        }

        let base = self.base_url.trim_end_matches('/');
        let version = &self.api_version;
        // Resource-level endpoints are not scoped to a deployment.
        if ["/models", "/assistants", "/threads", "/files"]
            .iter()
            .any(|p| suffix.contains(p))
        {
            return format!("{base}/openai{suffix}?api-version={version}");
        }

        let deployment = model
            .map(|m| self.azure_deployment(m))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        format!("{base}/openai/deployments/{deployment}{suffix}?api-version={version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("sk-test");
        assert_eq!(config.base_url, OPENAI_BASE_URL);
        assert_eq!(config.empty_messages_limit, 300);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.api_type, ApiType::OpenAi);
    }

    #[test]
    fn openai_url_is_base_plus_suffix() {
        let config = ClientConfig::new("k");
        assert_eq!(
            config.full_url("/chat/completions", Some("gpt-4o")),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn azure_url_uses_deployment() {
        let config = ClientConfig::azure("k", "https://res.openai.azure.com/");
        assert_eq!(
            config.full_url("/chat/completions", Some("gpt-3.5-turbo")),
            "https://res.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2023-05-15"
        );
    }

    #[test]
    fn azure_deployment_mapping_overrides_default() {
        let config = ClientConfig::azure("k", "https://res.openai.azure.com")
            .with_azure_deployment("gpt-4o", "prod-4o");
        assert_eq!(config.azure_deployment("gpt-4o"), "prod-4o");
        assert_eq!(config.azure_deployment("ft:gpt-4o.x"), "ftgpt-4ox");
    }

    #[test]
    fn azure_models_endpoint_is_not_deployment_scoped() {
        let config = ClientConfig::azure("k", "https://res.openai.azure.com")
            .with_api_version("2024-02-01");
        assert_eq!(
            config.full_url("/models", None),
            "https://res.openai.azure.com/openai/models?api-version=2024-02-01"
        );
    }
}
