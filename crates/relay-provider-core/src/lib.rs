//! Core provider abstractions for relay.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP client.
//! Provider implementations construct `UpstreamHttpRequest` values; a higher layer
//! performs the actual IO. Request bodies stay opaque `Bytes` end to end — only the
//! handful of fields each route needs to schedule and route a request are peeked out
//! via `relay_protocol`'s lightweight structs.

pub mod cache;
pub mod config;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod scheduler;

pub use cache::{ConcurrencyCache, ConcurrencySlot, SessionCache};
pub use config::{
    AzureOpenAiConfig, BaseUrlConfig, BedrockConfig, ClaudeCodeConfig, ClaudeCodePreludeText,
    CodexConfig, ModelRecord, ModelTable, ProviderConfig,
};
pub use credential::{
    AccountKind, AccountId, AccountState, AcquireError, Account, ApiKeyCredential,
    AzureOpenAiCredential, BedrockCredential, Credential, CredentialPool, OAuthCredentialSecret,
    UnavailableReason,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, ModelUnavailableEndEvent,
    ModelUnavailableStartEvent, OperationalEvent, TerminalEventSink, UnavailableEndEvent,
    UnavailableStartEvent, UpstreamEvent, UsageSummary,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    AuthRetryAction, ByteStream, HttpMethod, OAuthCallbackRequest, OAuthCallbackResult,
    OAuthCredential, OAuthStartRequest, UnavailableDecision, UpstreamBody, UpstreamCtx,
    UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse, UpstreamProvider,
    UpstreamTransportErrorKind, default_decide_unavailable,
};
pub use registry::ProviderRegistry;
pub use scheduler::{Dispatch, Scheduler};
