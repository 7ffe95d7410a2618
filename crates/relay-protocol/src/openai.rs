//! OpenAI-compatible surfaces this proxy forwards: Chat Completions and the
//! Responses API. Both are passthrough formats; these types extract only
//! what routing, session stickiness, and the client filter need.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// `/v1/chat/completions` request, shallow view.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsPeek {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<ContentField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentField {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl ContentField {
    pub fn as_text(&self) -> String {
        match self {
            ContentField::Text(text) => text.clone(),
            ContentField::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl ChatCompletionsPeek {
    /// The system/developer prompt text, if the caller sent one as the first
    /// message — this is what the client filter's Claude Code heuristic scans.
    pub fn system_prompt_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == "system" || m.role == "developer")
            .and_then(|m| m.content.as_ref())
            .map(ContentField::as_text)
    }
}

/// `/v1/responses` request, shallow view.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesPeek {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub input: Option<ResponsesInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<serde_json::Value>),
}

impl ResponsesPeek {
    /// The text of the first input item, used to derive a session id when no
    /// `instructions` field is present.
    pub fn first_input_text(&self) -> Option<String> {
        match self.input.as_ref()? {
            ResponsesInput::Text(text) => Some(text.clone()),
            ResponsesInput::Items(items) => {
                let first = items.first()?;
                first
                    .get("content")
                    .and_then(|c| c.as_array())
                    .and_then(|parts| parts.first())
                    .and_then(|part| part.get("text"))
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            }
        }
    }

    /// SHA-256 hex of `instructions`, else of the first input message's text.
    /// Returns `None` when neither is present, meaning the caller gets no
    /// sticky session for this request.
    pub fn session_id_hash(&self) -> Option<String> {
        let basis = self
            .instructions
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.first_input_text())?;
        let mut hasher = Sha256::new();
        hasher.update(basis.as_bytes());
        Some(to_hex(&hasher.finalize()))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

pub fn peek_chat_completions(body: &[u8]) -> Result<ChatCompletionsPeek, serde_json::Error> {
    serde_json::from_slice(body)
}

pub fn peek_responses(body: &[u8]) -> Result<ResponsesPeek, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completions_extracts_system_prompt() {
        let peek: ChatCompletionsPeek = serde_json::from_str(
            r#"{"model":"gpt-4o","messages":[{"role":"system","content":"be terse"},{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();
        assert_eq!(peek.system_prompt_text().as_deref(), Some("be terse"));
    }

    #[test]
    fn responses_session_hash_prefers_instructions() {
        let peek: ResponsesPeek =
            serde_json::from_str(r#"{"model":"gpt-4.1","instructions":"rewrite me"}"#).unwrap();
        let hash = peek.session_id_hash().unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn responses_session_hash_falls_back_to_first_input_text() {
        let peek: ResponsesPeek = serde_json::from_str(
            r#"{"model":"gpt-4.1","input":[{"content":[{"type":"input_text","text":"hello"}]}]}"#,
        )
        .unwrap();
        assert!(peek.session_id_hash().is_some());
    }

    #[test]
    fn responses_session_hash_none_without_basis() {
        let peek: ResponsesPeek = serde_json::from_str(r#"{"model":"gpt-4.1"}"#).unwrap();
        assert!(peek.session_id_hash().is_none());
    }
}
