//! The in-memory cache the scheduler reads and writes: sticky sessions and
//! concurrency slots. Account availability marks live on [`crate::CredentialPool`]
//! itself since they're intrinsic to account state, not a separate table.

mod concurrency;
mod session;

pub use concurrency::{ConcurrencyCache, ConcurrencySlot};
pub use session::SessionCache;
