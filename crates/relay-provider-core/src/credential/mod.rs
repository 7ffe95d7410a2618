mod model_unavailable_queue;
mod pool;
mod state;
mod unavailable_queue;

pub use pool::{Account, AcquireError, CredentialPool};
pub use state::{AccountId, AccountState, UnavailableReason};

use serde::{Deserialize, Serialize};

/// The nine upstream account flavors this proxy schedules requests across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    ClaudeOfficial,
    ClaudeConsole,
    OpenAi,
    OpenAiResponses,
    Gemini,
    GeminiApi,
    Bedrock,
    AzureOpenAi,
    Droid,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::ClaudeOfficial => "claude-official",
            AccountKind::ClaudeConsole => "claude-console",
            AccountKind::OpenAi => "openai",
            AccountKind::OpenAiResponses => "openai-responses",
            AccountKind::Gemini => "gemini",
            AccountKind::GeminiApi => "gemini-api",
            AccountKind::Bedrock => "bedrock",
            AccountKind::AzureOpenAi => "azure-openai",
            AccountKind::Droid => "droid",
        }
    }
}

/// A single upstream credential. Variants mirror [`AccountKind`] one-to-one.
///
/// Auth material resolution order within a variant (when more than one field
/// is populated) is session key, then access token, then static API key —
/// session keys are short-lived browser-session cookies that take priority
/// over a stored OAuth token, which in turn takes priority over a bare key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credential {
    ClaudeOfficial(OAuthCredentialSecret),
    ClaudeConsole(ApiKeyCredential),
    OpenAi(ApiKeyCredential),
    OpenAiResponses(OAuthCredentialSecret),
    Gemini(OAuthCredentialSecret),
    GeminiApi(ApiKeyCredential),
    Bedrock(BedrockCredential),
    AzureOpenAi(AzureOpenAiCredential),
    Droid(ApiKeyCredential),
}

impl Credential {
    pub fn kind(&self) -> AccountKind {
        match self {
            Credential::ClaudeOfficial(_) => AccountKind::ClaudeOfficial,
            Credential::ClaudeConsole(_) => AccountKind::ClaudeConsole,
            Credential::OpenAi(_) => AccountKind::OpenAi,
            Credential::OpenAiResponses(_) => AccountKind::OpenAiResponses,
            Credential::Gemini(_) => AccountKind::Gemini,
            Credential::GeminiApi(_) => AccountKind::GeminiApi,
            Credential::Bedrock(_) => AccountKind::Bedrock,
            Credential::AzureOpenAi(_) => AccountKind::AzureOpenAi,
            Credential::Droid(_) => AccountKind::Droid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub api_key: String,
}

/// Shared shape for the OAuth-backed account kinds (Claude official web
/// session, ChatGPT/Codex Responses, Gemini Code Assist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthCredentialSecret {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl OAuthCredentialSecret {
    /// Resolution order: session key, then access token. A caller falls
    /// through to a static key credential when this returns `None`.
    pub fn bearer_material(&self) -> Option<&str> {
        self.session_key
            .as_deref()
            .or(self.access_token.as_deref())
    }

    pub fn needs_refresh(&self, now_unix: i64, cooldown_secs: i64) -> bool {
        self.refresh_token.is_some() && self.expires_at - cooldown_secs <= now_unix
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureOpenAiCredential {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_material_prefers_session_key_over_access_token() {
        let secret = OAuthCredentialSecret {
            session_key: Some("sess".to_string()),
            access_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert_eq!(secret.bearer_material(), Some("sess"));
    }

    #[test]
    fn oauth_material_falls_back_to_access_token() {
        let secret = OAuthCredentialSecret {
            access_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert_eq!(secret.bearer_material(), Some("tok"));
    }

    #[test]
    fn needs_refresh_respects_cooldown_window() {
        let secret = OAuthCredentialSecret {
            refresh_token: Some("r".to_string()),
            expires_at: 1_000,
            ..Default::default()
        };
        assert!(secret.needs_refresh(900, 200));
        assert!(!secret.needs_refresh(500, 200));
    }
}
