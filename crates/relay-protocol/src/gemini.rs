//! Native Gemini `generateContent`/`streamGenerateContent` — shallow view.
//!
//! Gemini's model selection comes from the route path rather than the body
//! (`/v1beta/models/{model}:generateContent`), so this peek only needs the
//! body for the stream flag and session-stickiness inputs.

use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "gemini-pro";

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentPeek {
    #[serde(default)]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(default)]
    pub contents: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemInstruction {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

impl SystemInstruction {
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extracts the model name from a Gemini route path segment such as
/// `models/gemini-1.5-pro:generateContent`, falling back to the default
/// model when the path doesn't carry one.
pub fn model_from_path(path_segment: &str) -> String {
    path_segment
        .rsplit('/')
        .next()
        .and_then(|tail| tail.split(':').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

/// `stream` is conveyed by which operation suffix (`:generateContent` vs
/// `:streamGenerateContent`) the caller hit, not by a body field.
pub fn is_streaming_operation(path_segment: &str) -> bool {
    path_segment.ends_with(":streamGenerateContent")
}

pub fn peek(body: &[u8]) -> Result<GenerateContentPeek, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_model_from_versioned_path() {
        assert_eq!(
            model_from_path("models/gemini-1.5-pro:generateContent"),
            "gemini-1.5-pro"
        );
    }

    #[test]
    fn falls_back_to_default_model_on_empty_segment() {
        assert_eq!(model_from_path(""), DEFAULT_MODEL);
    }

    #[test]
    fn detects_streaming_suffix() {
        assert!(is_streaming_operation(
            "models/gemini-1.5-pro:streamGenerateContent"
        ));
        assert!(!is_streaming_operation(
            "models/gemini-1.5-pro:generateContent"
        ));
    }

    #[test]
    fn joins_system_instruction_parts() {
        let peek: GenerateContentPeek = serde_json::from_str(
            r#"{"system_instruction":{"parts":[{"text":"a"},{"text":"b"}]},"contents":[]}"#,
        )
        .unwrap();
        assert_eq!(peek.system_instruction.unwrap().joined_text(), "a\nb");
    }
}
