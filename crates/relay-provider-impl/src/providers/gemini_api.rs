//! `gemini-api`: the public AI Studio surface, authenticated with a plain
//! API key carried in the `x-goog-api-key` header.

use async_trait::async_trait;
use bytes::Bytes;

use relay_protocol::gemini::GenerateContentPeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "gemini-api";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Default)]
pub struct GeminiApiProvider;

impl GeminiApiProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for GeminiApiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn build_generate_content(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        _peek: &GenerateContentPeek,
        raw_body: &Bytes,
        model: &str,
        stream: bool,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let cfg = match config {
            ProviderConfig::GeminiApi(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected gemini-api config".into())),
        };
        let api_key = match credential {
            Credential::GeminiApi(c) => c.api_key.as_str(),
            _ => return Err(ProviderError::InvalidConfig("expected gemini-api credential".into())),
        };

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let op = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = build_url(
            Some(base_url),
            DEFAULT_BASE_URL,
            &format!("/v1beta/models/{model}:{op}"),
        );

        let mut headers = Vec::new();
        auth_extractor::set_header(&mut headers, "x-goog-api-key", api_key);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(raw_body.clone()),
            is_stream: stream,
        })
    }
}
