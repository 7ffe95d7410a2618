pub mod auth;
pub mod bootstrap;
pub mod classify;
pub mod client_filter;
pub mod error;
pub mod health;
pub mod proxy_engine;
pub mod retry;
pub mod state;
pub mod stream;
pub mod upstream_client;
pub mod usage_recorder;

pub use auth::{
    AuthContext, AuthError, AuthKeyEntry, AuthProvider, AuthSnapshot, MemoryAuth, NoopAuth,
    UserEntry,
};
pub use classify::ProxyClassified;
pub use client_filter::{ClientFilter, ClientRule, Verdict};
pub use health::HealthService;
pub use proxy_engine::ProxyEngine;
pub use retry::{RetryError, RetryOutcome};
pub use state::AppState;
pub use stream::{StreamForwarder, UsageTotals};
pub use usage_recorder::{record as record_usage, CompletedRequest};
