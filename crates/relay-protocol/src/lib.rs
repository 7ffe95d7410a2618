//! Native wire-format types for the three dialects this proxy forwards.
//!
//! The proxy routes native formats to native upstreams (see the crate-level
//! Non-goal on cross-dialect transform) so these types are deliberately
//! shallow: just enough structure to classify a request, pick a model, and
//! detect session/instruction fields for stickiness and the client filter.
//! The request body itself travels upstream as opaque `Bytes`.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;

pub use sse::{SseEvent, SseParser};
