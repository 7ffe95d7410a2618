//! Claude Messages API (`/v1/messages`) — shallow peek types.
//!
//! The request body is forwarded to the upstream account byte-for-byte; we
//! only ever deserialize the handful of fields routing, stickiness, and the
//! client filter need.

use serde::Deserialize;

/// The two headers every native Claude route cares about: the API version
/// gate and the comma-separated beta feature flags.
#[derive(Debug, Clone, Default)]
pub struct AnthropicHeaders {
    pub anthropic_version: Option<String>,
    pub anthropic_beta: Option<String>,
}

impl AnthropicHeaders {
    pub fn from_header_map(headers: &http::HeaderMap) -> Self {
        Self {
            anthropic_version: header_str(headers, "anthropic-version"),
            anthropic_beta: header_str(headers, "anthropic-beta"),
        }
    }

    pub fn has_beta(&self, flag: &str) -> bool {
        self.anthropic_beta
            .as_deref()
            .is_some_and(|value| value.split(',').any(|part| part.trim() == flag))
    }
}

fn header_str(headers: &http::HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

/// Minimal view over a `CreateMessage` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessagePeek {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Anthropic's `system` field is either a plain string or an array of typed
/// blocks; the client filter's Dice-similarity check needs the text either way.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: String,
}

impl SystemPrompt {
    /// Concatenates all text content, matching how Claude itself treats an
    /// array-form system prompt as one logical prompt for moderation purposes.
    pub fn joined_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

pub fn peek(body: &[u8]) -> Result<CreateMessagePeek, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_system_prompt() {
        let peek: CreateMessagePeek = serde_json::from_str(
            r#"{"model":"claude-3-5-sonnet","stream":true,"system":"be terse"}"#,
        )
        .unwrap();
        assert_eq!(peek.model, "claude-3-5-sonnet");
        assert!(peek.stream);
        assert_eq!(peek.system.unwrap().joined_text(), "be terse");
    }

    #[test]
    fn parses_block_array_system_prompt() {
        let peek: CreateMessagePeek = serde_json::from_str(
            r#"{"model":"claude-3-5-haiku","system":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(peek.system.unwrap().joined_text(), "a\nb");
    }

    #[test]
    fn missing_stream_defaults_to_false() {
        let peek: CreateMessagePeek =
            serde_json::from_str(r#"{"model":"claude-3-opus","messages":[]}"#).unwrap();
        assert!(!peek.stream);
    }

    #[test]
    fn beta_flag_lookup_splits_on_comma() {
        let headers = AnthropicHeaders {
            anthropic_version: Some("2023-06-01".to_string()),
            anthropic_beta: Some("prompt-caching-2024-07-31, interleaved-thinking".to_string()),
        };
        assert!(headers.has_beta("prompt-caching-2024-07-31"));
        assert!(headers.has_beta("interleaved-thinking"));
        assert!(!headers.has_beta("unknown-beta"));
    }
}
