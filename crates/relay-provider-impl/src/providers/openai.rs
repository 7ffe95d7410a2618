//! `openai`: a plain OpenAI API key hitting Chat Completions.

use async_trait::async_trait;
use bytes::Bytes;

use relay_protocol::openai::ChatCompletionsPeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Default)]
pub struct OpenAiProvider;

impl OpenAiProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn build_chat_completions(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        peek: &ChatCompletionsPeek,
        raw_body: &Bytes,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let cfg = match config {
            ProviderConfig::OpenAi(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected openai config".into())),
        };
        let api_key = match credential {
            Credential::OpenAi(c) => c.api_key.as_str(),
            _ => return Err(ProviderError::InvalidConfig("expected openai credential".into())),
        };

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = build_url(Some(base_url), DEFAULT_BASE_URL, "/v1/chat/completions");

        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, api_key);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(raw_body.clone()),
            is_stream: peek.stream,
        })
    }
}
