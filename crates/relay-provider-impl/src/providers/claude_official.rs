//! `claude-official`: the Claude.ai web-session OAuth surface Claude Code
//! itself talks to. Auth is a bearer token (session key or access token);
//! the account's `prelude_text` choice gets injected as the system prompt
//! when the caller didn't send one, matching what the real client sends.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use relay_protocol::claude::CreateMessagePeek;
use relay_provider_core::{
    ClaudeCodePreludeText, Credential, HttpMethod, ProviderConfig, ProviderError, ProviderResult,
    UpstreamCtx, UpstreamHttpRequest, UpstreamProvider, header_set,
};

use crate::auth_extractor;
use crate::providers::url::build_url;

const PROVIDER_NAME: &str = "claude-official";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const CLAUDE_CODE_SYSTEM_PRELUDE: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";
const CLAUDE_AGENT_SDK_PRELUDE: &str =
    "You are a Claude agent, built on Anthropic's Claude Agent SDK.";

#[derive(Debug, Default)]
pub struct ClaudeOfficialProvider;

impl ClaudeOfficialProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamProvider for ClaudeOfficialProvider {
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
            ProviderConfig::ClaudeOfficial(cfg) => cfg,
            _ => return Err(ProviderError::InvalidConfig("expected claude-official config".into())),
        };
        let secret = match credential {
            Credential::ClaudeOfficial(secret) => secret,
            _ => return Err(ProviderError::InvalidConfig("expected claude-official credential".into())),
        };
        let bearer = secret
            .bearer_material()
            .ok_or(ProviderError::MissingCredentialField("session_key or access_token"))?;

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = build_url(Some(base_url), DEFAULT_BASE_URL, "/v1/messages");

        let body = if peek.system.is_none() {
            let prelude = match cfg.prelude_text.unwrap_or_default() {
                ClaudeCodePreludeText::ClaudeCodeSystem => CLAUDE_CODE_SYSTEM_PRELUDE,
                ClaudeCodePreludeText::ClaudeAgentSdk => CLAUDE_AGENT_SDK_PRELUDE,
            };
            inject_system_prompt(raw_body, prelude)?
        } else {
            raw_body.clone()
        };

        let mut headers = Vec::new();
        auth_extractor::set_bearer(&mut headers, bearer);
        auth_extractor::set_accept_json(&mut headers);
        auth_extractor::set_content_type_json(&mut headers);
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
        header_set(&mut headers, "anthropic-beta", OAUTH_BETA);

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body),
            is_stream: peek.stream,
        })
    }
}

/// Parses the raw body just enough to add a `system` field; everything else
/// passes through untouched.
fn inject_system_prompt(raw_body: &Bytes, prelude: &str) -> ProviderResult<Bytes> {
    let mut value: Value =
        serde_json::from_slice(raw_body).map_err(|err| ProviderError::Other(err.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("system".to_string(), Value::String(prelude.to_string()));
    }
    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_claude_code_prelude_when_system_missing() {
        let body = Bytes::from_static(br#"{"model":"claude-3-5-sonnet","messages":[]}"#);
        let out = inject_system_prompt(&body, CLAUDE_CODE_SYSTEM_PRELUDE).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["system"], CLAUDE_CODE_SYSTEM_PRELUDE);
    }
}
