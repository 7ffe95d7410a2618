//! `gemini`: the Cloud Code Assist OAuth surface (what the Gemini CLI talks
//! to), bearer-authenticated against `cloudcode-pa.googleapis.com`.

use async_trait::async_trait;
use bytes::Bytes;

use relay_protocol::gemini::GenerateContentPeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

#[derive(Debug, Default)]
pub struct GeminiProvider;

impl GeminiProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for GeminiProvider {
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
            ProviderConfig::Gemini(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected gemini config".into())),
        };
        let secret = match credential {
            Credential::Gemini(secret) => secret,
            _ => return Err(ProviderError::InvalidConfig("expected gemini credential".into())),
        };
        let bearer = secret
            .bearer_material()
            .ok_or(ProviderError::MissingCredentialField("access_token"))?;

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let op = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = build_url(
            Some(base_url),
            DEFAULT_BASE_URL,
            &format!("/v1internal:{op}?model={model}"),
        );

        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, bearer);
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
