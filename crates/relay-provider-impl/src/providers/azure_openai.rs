//! `azure-openai`: Azure's deployment-scoped Chat Completions surface.
//! Unlike the other kinds, the route, API version and auth all come out of
//! the credential itself — Azure binds an API key to one deployment.

use async_trait::async_trait;
use bytes::Bytes;

use relay_protocol::openai::ChatCompletionsPeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;

const PROVIDER_NAME: &str = "azure-openai";

#[derive(Debug, Default)]
pub struct AzureOpenAiProvider;

impl AzureOpenAiProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for AzureOpenAiProvider {
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
            ProviderConfig::AzureOpenAi(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected azure-openai config".into())),
        };
        let cred = match credential {
            Credential::AzureOpenAi(cred) => cred,
            _ => return Err(ProviderError::InvalidConfig("expected azure-openai credential".into())),
        };

        let api_version = cfg
            .api_version_override
            .as_deref()
            .unwrap_or(cred.api_version.as_str());
        let endpoint = cred.endpoint.trim_end_matches('/');
        let url = format!(
            "{endpoint}/openai/deployments/{}/chat/completions?api-version={api_version}",
            cred.deployment,
        );

        let mut headers = Vec::new();
        auth_extractor::set_header(&mut headers, "api-key", &cred.api_key);
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
