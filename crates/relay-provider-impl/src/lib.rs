//! Built-in upstream provider implementations.
//!
//! This crate does not perform network IO. It builds `UpstreamHttpRequest` for
//! upstream calls (including provider-specific internal calls like `upstream_usage`).

mod auth_extractor;
mod providers;
mod registry;

pub use providers::{
    AzureOpenAiProvider, BedrockProvider, ClaudeConsoleProvider, ClaudeOfficialProvider,
    DroidProvider, GeminiApiProvider, GeminiProvider, OpenAiProvider, OpenAiResponsesProvider,
};
pub use registry::register_builtin_providers;
