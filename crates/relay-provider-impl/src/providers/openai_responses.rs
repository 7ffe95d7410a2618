//! `openai-responses`: the ChatGPT/Codex backend surface. Auth is a bearer
//! OAuth access token plus the account's `chatgpt-account-id` header; when
//! the caller omitted `instructions` and the account's `instructions_rewrite`
//! flag is on (the default), the built-in Codex CLI instructions get injected
//! so the request reads the same way the real CLI's does.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use relay_protocol::openai::ResponsesPeek;
use relay_provider_core::{
    Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult, UpstreamCtx,
    UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "openai-responses";
const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const DEFAULT_CODEX_INSTRUCTIONS: &str =
    "You are Codex, based on GPT-5. You are running as a coding agent.";

#[derive(Debug, Default)]
pub struct OpenAiResponsesProvider;

impl OpenAiResponsesProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for OpenAiResponsesProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn build_responses(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        peek: &ResponsesPeek,
        raw_body: &Bytes,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let cfg = match config {
            ProviderConfig::OpenAiResponses(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected openai-responses config".into())),
        };
        let secret = match credential {
            Credential::OpenAiResponses(secret) => secret,
            _ => return Err(ProviderError::InvalidConfig("expected openai-responses credential".into())),
        };
        let bearer = secret
            .bearer_material()
            .ok_or(ProviderError::MissingCredentialField("access_token"))?;

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = build_url(Some(base_url), DEFAULT_BASE_URL, "/responses");

        let rewrite = cfg.instructions_rewrite.unwrap_or(true);
        let body = if rewrite && peek.instructions.is_none() {
            inject_instructions(raw_body, DEFAULT_CODEX_INSTRUCTIONS)?
        } else {
            raw_body.clone()
        };

        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, bearer);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);
        if let Some(account_id) = &secret.account_id {
            auth_extractor::set_header(&mut headers, "chatgpt-account-id", account_id);
        }

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body),
            is_stream: peek.stream,
        })
    }
}

fn inject_instructions(raw_body: &Bytes, instructions: &str) -> ProviderResult<Bytes> {
    let mut value: Value =
        serde_json::from_slice(raw_body).map_err(|err| ProviderError::Other(err.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("instructions".to_string(), Value::String(instructions.to_string()));
    }
    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_default_instructions_when_missing() {
        let body = Bytes::from_static(br#"{"model":"gpt-5","input":"hi"}"#);
        let out = inject_instructions(&body, DEFAULT_CODEX_INSTRUCTIONS).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["instructions"], DEFAULT_CODEX_INSTRUCTIONS);
    }
}
