//! HTTP surface: the proxy routes (dispatched into `ProxyEngine`) and the
//! admin routes (direct `Storage`/`AppState`/`HealthService` mutations).
//! Routing itself carries no business logic — every handler here either
//! forwards to `relay_core::ProxyEngine::handle` or performs one storage
//! call and refreshes the in-memory snapshot it feeds.

pub mod admin;
pub mod proxy;

pub use admin::admin_router;
pub use proxy::proxy_router;
