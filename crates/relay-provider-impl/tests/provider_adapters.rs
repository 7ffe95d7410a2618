use bytes::Bytes;

use relay_protocol::claude::CreateMessagePeek;
use relay_protocol::gemini::GenerateContentPeek;
use relay_protocol::openai::{ChatCompletionsPeek, ResponsesPeek};
use relay_provider_core::credential::{
    AzureOpenAiCredential, BedrockCredential,
};
use relay_provider_core::{
    ApiKeyCredential, AzureOpenAiConfig, BaseUrlConfig, BedrockConfig, ClaudeCodeConfig,
    ClaudeCodePreludeText, CodexConfig, Credential, HttpMethod, OAuthCredentialSecret,
    ProviderConfig, ProviderRegistry, UpstreamCtx, header_get,
};
use relay_provider_impl::register_builtin_providers;

fn ctx(provider: &str) -> UpstreamCtx {
    UpstreamCtx {
        trace_id: None,
        user_id: None,
        user_key_id: None,
        user_agent: None,
        outbound_proxy: None,
        provider: provider.to_string(),
        account_id: Some(1),
        attempt_no: 0,
    }
}

fn registry() -> ProviderRegistry {
    let mut reg = ProviderRegistry::new();
    register_builtin_providers(&mut reg);
    reg
}

#[tokio::test]
async fn claude_official_injects_prelude_and_oauth_headers() {
    let reg = registry();
    let provider = reg.get("claude-official").unwrap();
    let config = ProviderConfig::ClaudeOfficial(ClaudeCodeConfig {
        base_url: None,
        prelude_text: Some(ClaudeCodePreludeText::ClaudeCodeSystem),
        model_table: None,
    });
    let cred = Credential::ClaudeOfficial(OAuthCredentialSecret {
        access_token: Some("tok".to_string()),
        ..Default::default()
    });
    let raw = Bytes::from_static(br#"{"model":"claude-3-5-sonnet","messages":[]}"#);
    let peek: CreateMessagePeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_messages(&ctx("claude-official"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(req.method, HttpMethod::Post);
    assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
    assert_eq!(header_get(&req.headers, "authorization"), Some("Bearer tok"));
    assert_eq!(
        header_get(&req.headers, "anthropic-beta"),
        Some("oauth-2025-04-20")
    );
    let body: serde_json::Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
    assert!(body["system"].as_str().unwrap().contains("Claude Code"));
}

#[tokio::test]
async fn claude_console_uses_api_key_header_and_skips_rewrite() {
    let reg = registry();
    let provider = reg.get("claude-console").unwrap();
    let config = ProviderConfig::ClaudeConsole(BaseUrlConfig::default());
    let cred = Credential::ClaudeConsole(ApiKeyCredential {
        api_key: "sk-console".to_string(),
    });
    let raw = Bytes::from_static(br#"{"model":"claude-3-5-sonnet","system":"hi","messages":[]}"#);
    let peek: CreateMessagePeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_messages(&ctx("claude-console"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(header_get(&req.headers, "x-api-key"), Some("sk-console"));
    assert_eq!(req.body.unwrap(), raw);
}

#[tokio::test]
async fn openai_chat_completions_bearer_auth() {
    let reg = registry();
    let provider = reg.get("openai").unwrap();
    let config = ProviderConfig::OpenAi(BaseUrlConfig::default());
    let cred = Credential::OpenAi(ApiKeyCredential {
        api_key: "sk-openai".to_string(),
    });
    let raw = Bytes::from_static(br#"{"model":"gpt-4o","messages":[]}"#);
    let peek: ChatCompletionsPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_chat_completions(&ctx("openai"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(
        header_get(&req.headers, "authorization"),
        Some("Bearer sk-openai")
    );
}

#[tokio::test]
async fn openai_responses_injects_default_codex_instructions() {
    let reg = registry();
    let provider = reg.get("openai-responses").unwrap();
    let config = ProviderConfig::OpenAiResponses(CodexConfig::default());
    let cred = Credential::OpenAiResponses(OAuthCredentialSecret {
        access_token: Some("codex-tok".to_string()),
        account_id: Some("acct-1".to_string()),
        ..Default::default()
    });
    let raw = Bytes::from_static(br#"{"model":"gpt-5","input":"hi"}"#);
    let peek: ResponsesPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_responses(&ctx("openai-responses"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(req.url, "https://chatgpt.com/backend-api/codex/responses");
    assert_eq!(
        header_get(&req.headers, "chatgpt-account-id"),
        Some("acct-1")
    );
    let body: serde_json::Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
    assert!(body["instructions"].as_str().unwrap().contains("Codex"));
}

#[tokio::test]
async fn gemini_oauth_builds_cloud_code_assist_url() {
    let reg = registry();
    let provider = reg.get("gemini").unwrap();
    let config = ProviderConfig::Gemini(BaseUrlConfig::default());
    let cred = Credential::Gemini(OAuthCredentialSecret {
        access_token: Some("gtok".to_string()),
        ..Default::default()
    });
    let raw = Bytes::from_static(br#"{"contents":[]}"#);
    let peek: GenerateContentPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_generate_content(
            &ctx("gemini"),
            &config,
            &cred,
            &peek,
            &raw,
            "gemini-1.5-pro",
            true,
        )
        .await
        .unwrap();

    assert_eq!(
        req.url,
        "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?model=gemini-1.5-pro"
    );
    assert_eq!(header_get(&req.headers, "authorization"), Some("Bearer gtok"));
}

#[tokio::test]
async fn gemini_api_uses_goog_api_key_header() {
    let reg = registry();
    let provider = reg.get("gemini-api").unwrap();
    let config = ProviderConfig::GeminiApi(BaseUrlConfig::default());
    let cred = Credential::GeminiApi(ApiKeyCredential {
        api_key: "aistudio-key".to_string(),
    });
    let raw = Bytes::from_static(br#"{"contents":[]}"#);
    let peek: GenerateContentPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_generate_content(
            &ctx("gemini-api"),
            &config,
            &cred,
            &peek,
            &raw,
            "gemini-1.5-flash",
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        req.url,
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
    );
    assert_eq!(
        header_get(&req.headers, "x-goog-api-key"),
        Some("aistudio-key")
    );
}

#[tokio::test]
async fn bedrock_signs_request_with_sigv4_authorization_header() {
    let reg = registry();
    let provider = reg.get("bedrock").unwrap();
    let config = ProviderConfig::Bedrock(BedrockConfig::default());
    let cred = Credential::Bedrock(BedrockCredential {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
        region: "us-east-1".to_string(),
        session_token: None,
    });
    let raw = Bytes::from_static(br#"{"anthropic_version":"bedrock-2023-05-31","messages":[]}"#);
    let peek = CreateMessagePeek {
        model: "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
        stream: false,
        system: None,
        metadata: None,
    };

    let req = provider
        .build_messages(&ctx("bedrock"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert!(req.url.contains("bedrock-runtime.us-east-1.amazonaws.com"));
    assert!(req.url.contains("anthropic.claude-3-5-sonnet-20241022-v2:0"));
    let auth = header_get(&req.headers, "authorization").unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
}

#[tokio::test]
async fn azure_openai_builds_deployment_scoped_url() {
    let reg = registry();
    let provider = reg.get("azure-openai").unwrap();
    let config = ProviderConfig::AzureOpenAi(AzureOpenAiConfig::default());
    let cred = Credential::AzureOpenAi(AzureOpenAiCredential {
        api_key: "azkey".to_string(),
        endpoint: "https://myres.openai.azure.com".to_string(),
        deployment: "gpt4o-deploy".to_string(),
        api_version: "2024-06-01".to_string(),
    });
    let raw = Bytes::from_static(br#"{"model":"gpt-4o","messages":[]}"#);
    let peek: ChatCompletionsPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_chat_completions(&ctx("azure-openai"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(
        req.url,
        "https://myres.openai.azure.com/openai/deployments/gpt4o-deploy/chat/completions?api-version=2024-06-01"
    );
    assert_eq!(header_get(&req.headers, "api-key"), Some("azkey"));
}

#[tokio::test]
async fn droid_uses_bearer_auth_against_default_base_url() {
    let reg = registry();
    let provider = reg.get("droid").unwrap();
    let config = ProviderConfig::Droid(BaseUrlConfig::default());
    let cred = Credential::Droid(ApiKeyCredential {
        api_key: "droid-key".to_string(),
    });
    let raw = Bytes::from_static(br#"{"model":"droid-1","messages":[]}"#);
    let peek: ChatCompletionsPeek = serde_json::from_slice(&raw).unwrap();

    let req = provider
        .build_chat_completions(&ctx("droid"), &config, &cred, &peek, &raw)
        .await
        .unwrap();

    assert_eq!(req.url, "https://api.factory.ai/v1/chat/completions");
    assert_eq!(
        header_get(&req.headers, "authorization"),
        Some("Bearer droid-key")
    );
}
