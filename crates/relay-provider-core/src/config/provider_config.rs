use serde::{Deserialize, Serialize};

use crate::AccountKind;

use super::ModelTable;

/// Per-account-kind static configuration: base URL overrides, and the
/// handful of kind-specific knobs the adapters in `relay-provider-impl`
/// need (Claude Code's system-prompt variant, Codex's `instructions`
/// rewrite gate, Azure's deployment routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "settings", rename_all = "kebab-case")]
pub enum ProviderConfig {
    ClaudeOfficial(ClaudeCodeConfig),
    ClaudeConsole(BaseUrlConfig),
    OpenAi(BaseUrlConfig),
    OpenAiResponses(CodexConfig),
    Gemini(BaseUrlConfig),
    GeminiApi(BaseUrlConfig),
    Bedrock(BedrockConfig),
    AzureOpenAi(AzureOpenAiConfig),
    Droid(BaseUrlConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> AccountKind {
        match self {
            ProviderConfig::ClaudeOfficial(_) => AccountKind::ClaudeOfficial,
            ProviderConfig::ClaudeConsole(_) => AccountKind::ClaudeConsole,
            ProviderConfig::OpenAi(_) => AccountKind::OpenAi,
            ProviderConfig::OpenAiResponses(_) => AccountKind::OpenAiResponses,
            ProviderConfig::Gemini(_) => AccountKind::Gemini,
            ProviderConfig::GeminiApi(_) => AccountKind::GeminiApi,
            ProviderConfig::Bedrock(_) => AccountKind::Bedrock,
            ProviderConfig::AzureOpenAi(_) => AccountKind::AzureOpenAi,
            ProviderConfig::Droid(_) => AccountKind::Droid,
        }
    }

    pub fn model_table(&self) -> Option<&ModelTable> {
        match self {
            ProviderConfig::ClaudeOfficial(c) => c.model_table.as_ref(),
            ProviderConfig::ClaudeConsole(c)
            | ProviderConfig::OpenAi(c)
            | ProviderConfig::Gemini(c)
            | ProviderConfig::GeminiApi(c)
            | ProviderConfig::Droid(c) => c.model_table.as_ref(),
            ProviderConfig::OpenAiResponses(c) => c.model_table.as_ref(),
            ProviderConfig::Bedrock(c) => c.model_table.as_ref(),
            ProviderConfig::AzureOpenAi(c) => c.model_table.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseUrlConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeCodeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "prelude_txt")]
    pub prelude_text: Option<ClaudeCodePreludeText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaudeCodePreludeText {
    #[default]
    ClaudeCodeSystem,
    ClaudeAgentSdk,
}

impl ClaudeCodePreludeText {
    pub fn parse_loose(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("claude_agent_sdk")
            || value.eq_ignore_ascii_case("claude_agent")
            || value.eq_ignore_ascii_case("agent_sdk")
            || value == "You are a Claude agent, built on Anthropic's Claude Agent SDK."
        {
            return Self::ClaudeAgentSdk;
        }
        Self::ClaudeCodeSystem
    }
}

impl<'de> Deserialize<'de> for ClaudeCodePreludeText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse_loose(&value))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodexConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Whether non-Codex callers get the built-in Codex `instructions` text
    /// injected when they omit one. Falls back to the global default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions_rewrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureOpenAiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

#[cfg(test)]
mod tests {
    use super::ClaudeCodePreludeText;

    #[test]
    fn claudecode_prelude_text_parses_canonical_values() {
        assert_eq!(
            serde_json::from_str::<ClaudeCodePreludeText>("\"claude_code_system\"").unwrap(),
            ClaudeCodePreludeText::ClaudeCodeSystem
        );
        assert_eq!(
            serde_json::from_str::<ClaudeCodePreludeText>("\"claude_agent_sdk\"").unwrap(),
            ClaudeCodePreludeText::ClaudeAgentSdk
        );
    }
}
