//! Routes an inbound request to one of the four native wire formats this
//! proxy forwards, and peeks the handful of fields scheduling needs. The
//! request body itself is never fully parsed or transformed — it travels
//! upstream as the same `Bytes` it arrived in.

use bytes::Bytes;
use http::HeaderMap;

use relay_protocol::claude::{AnthropicHeaders, CreateMessagePeek};
use relay_protocol::gemini::{self, GenerateContentPeek};
use relay_protocol::openai::{ChatCompletionsPeek, ResponsesPeek};

use crate::error::ProxyError;

/// A request pinned to a specific account kind by its route (`/claude/...`,
/// `/openai/...`) rather than left to the scheduler's normal candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedKind {
    Claude,
    OpenAi,
}

#[derive(Debug, Clone)]
pub enum ProxyClassified {
    ClaudeMessages {
        peek: CreateMessagePeek,
        headers: AnthropicHeaders,
        pin: Option<PinnedKind>,
    },
    ChatCompletions {
        peek: ChatCompletionsPeek,
        pin: Option<PinnedKind>,
    },
    Responses {
        peek: ResponsesPeek,
    },
    GenerateContent {
        peek: GenerateContentPeek,
        model: String,
        stream: bool,
    },
}

impl ProxyClassified {
    pub fn model(&self) -> &str {
        match self {
            ProxyClassified::ClaudeMessages { peek, .. } => &peek.model,
            ProxyClassified::ChatCompletions { peek, .. } => &peek.model,
            ProxyClassified::Responses { peek } => &peek.model,
            ProxyClassified::GenerateContent { model, .. } => model,
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            ProxyClassified::ClaudeMessages { peek, .. } => peek.stream,
            ProxyClassified::ChatCompletions { peek, .. } => peek.stream,
            ProxyClassified::Responses { peek } => peek.stream,
            ProxyClassified::GenerateContent { stream, .. } => *stream,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            ProxyClassified::ClaudeMessages { .. } => "messages",
            ProxyClassified::ChatCompletions { .. } => "chat_completions",
            ProxyClassified::Responses { .. } => "responses",
            ProxyClassified::GenerateContent { .. } => "generate_content",
        }
    }

    /// Text used for the client filter's Claude-Code Dice-similarity check.
    pub fn system_prompt_text(&self) -> Option<String> {
        match self {
            ProxyClassified::ClaudeMessages { peek, .. } => {
                peek.system.as_ref().map(|s| s.joined_text())
            }
            ProxyClassified::ChatCompletions { peek, .. } => peek.system_prompt_text(),
            ProxyClassified::Responses { peek } => peek.instructions.clone(),
            ProxyClassified::GenerateContent { peek, .. } => {
                peek.system_instruction.as_ref().map(|s| s.joined_text())
            }
        }
    }

    /// Best-effort session id for sticky routing: Responses derives one from
    /// a content hash; the others rely on a client-supplied header upstream
    /// of classification.
    pub fn derived_session_id(&self) -> Option<String> {
        match self {
            ProxyClassified::Responses { peek } => peek.session_id_hash(),
            _ => None,
        }
    }
}

fn trim_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// Classifies a routed request. `path` is the request path with the router's
/// own prefix already stripped off (callers pass the path axum matched).
pub fn classify_request(
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<ProxyClassified, ProxyError> {
    let segments = trim_segments(path);

    match segments.as_slice() {
        ["claude", "v1", "messages"] => classify_claude_messages(headers, body, Some(PinnedKind::Claude)),
        ["v1", "messages"] | ["api", "v1", "messages"] => {
            classify_claude_messages(headers, body, None)
        }
        ["openai", "v1", "chat", "completions"] => {
            classify_chat_completions(body, Some(PinnedKind::OpenAi))
        }
        ["v1", "chat", "completions"] => classify_chat_completions(body, None),
        ["gemini", "v1", "chat"] => classify_gemini_native(body),
        ["responses"]
        | ["v1", "responses"]
        | ["responses", "compact"]
        | ["v1", "responses", "compact"]
        | ["openai", "responses"]
        | ["openai", "v1", "responses"] => classify_responses(body),
        _ => Err(ProxyError::not_found("unrecognized route")),
    }
}

fn classify_claude_messages(
    headers: &HeaderMap,
    body: &Bytes,
    pin: Option<PinnedKind>,
) -> Result<ProxyClassified, ProxyError> {
    let peek = relay_protocol::claude::peek(body)
        .map_err(|e| ProxyError::bad_request(format!("invalid messages body: {e}")))?;
    Ok(ProxyClassified::ClaudeMessages {
        peek,
        headers: AnthropicHeaders::from_header_map(headers),
        pin,
    })
}

fn classify_chat_completions(
    body: &Bytes,
    pin: Option<PinnedKind>,
) -> Result<ProxyClassified, ProxyError> {
    let peek = relay_protocol::openai::peek_chat_completions(body)
        .map_err(|e| ProxyError::bad_request(format!("invalid chat completions body: {e}")))?;
    Ok(ProxyClassified::ChatCompletions { peek, pin })
}

fn classify_responses(body: &Bytes) -> Result<ProxyClassified, ProxyError> {
    let peek = relay_protocol::openai::peek_responses(body)
        .map_err(|e| ProxyError::bad_request(format!("invalid responses body: {e}")))?;
    Ok(ProxyClassified::Responses { peek })
}

/// `/gemini/v1/chat` doesn't carry a `models/{model}:action` path segment
/// the way the native `/v1beta` surface does, so it always defaults to
/// `gemini-pro` and non-streaming, matching the route table's note.
fn classify_gemini_native(body: &Bytes) -> Result<ProxyClassified, ProxyError> {
    let peek = gemini::peek(body)
        .map_err(|e| ProxyError::bad_request(format!("invalid gemini chat body: {e}")))?;
    Ok(ProxyClassified::GenerateContent {
        peek,
        model: gemini::DEFAULT_MODEL.to_string(),
        stream: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HeaderMap {
        HeaderMap::new()
    }

    #[test]
    fn routes_plain_messages_path_unpinned() {
        let body = Bytes::from_static(br#"{"model":"claude-3-5-sonnet","stream":true}"#);
        let classified = classify_request("/v1/messages", &headers(), &body).unwrap();
        assert_eq!(classified.model(), "claude-3-5-sonnet");
        assert!(classified.is_stream());
        match classified {
            ProxyClassified::ClaudeMessages { pin, .. } => assert_eq!(pin, None),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn routes_pinned_claude_path() {
        let body = Bytes::from_static(br#"{"model":"claude-3-opus"}"#);
        let classified = classify_request("/claude/v1/messages", &headers(), &body).unwrap();
        match classified {
            ProxyClassified::ClaudeMessages { pin, .. } => {
                assert_eq!(pin, Some(PinnedKind::Claude))
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn routes_chat_completions() {
        let body = Bytes::from_static(br#"{"model":"gpt-4o","messages":[]}"#);
        let classified = classify_request("/v1/chat/completions", &headers(), &body).unwrap();
        assert_eq!(classified.operation(), "chat_completions");
    }

    #[test]
    fn routes_responses_variants() {
        let body = Bytes::from_static(br#"{"model":"gpt-4.1"}"#);
        for path in [
            "/responses",
            "/v1/responses",
            "/responses/compact",
            "/v1/responses/compact",
            "/openai/responses",
            "/openai/v1/responses",
        ] {
            let classified = classify_request(path, &headers(), &body).unwrap();
            assert_eq!(classified.operation(), "responses");
        }
    }

    #[test]
    fn unknown_route_is_not_found() {
        let body = Bytes::from_static(b"{}");
        let err = classify_request("/nope", &headers(), &body).unwrap_err();
        assert_eq!(err.status, http::StatusCode::NOT_FOUND);
    }
}
