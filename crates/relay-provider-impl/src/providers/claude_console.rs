//! `claude-console`: a plain Anthropic API key, billed through the
//! Console/Platform surface rather than a claude.ai session.

use async_trait::async_trait;
use bytes::Bytes;

use relay_protocol::claude::CreateMessagePeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider, header_set,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "claude-console";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Default)]
pub struct ClaudeConsoleProvider;

impl ClaudeConsoleProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for ClaudeConsoleProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn build_messages(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        peek: &CreateMessagePeek,
        raw_body: &Bytes,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let cfg = match config {
            ProviderConfig::ClaudeConsole(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected claude-console config".into())),
        };
        let api_key = match credential {
            Credential::ClaudeConsole(c) => c.api_key.as_str(),
            _ => return Err(ProviderError::InvalidConfig("expected claude-console credential".into())),
        };

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = build_url(Some(base_url), DEFAULT_BASE_URL, "/v1/messages");

        let mut headers = Vec::new();
        auth_extractor::set_header(&mut headers, "x-api-key", api_key);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(raw_body.clone()),
            is_stream: peek.stream,
        })
    }
}
