use tokio::time::Instant;

use serde::{Deserialize, Serialize};

pub type AccountId = i64;

#[derive(Debug, Clone)]
pub enum AccountState {
    Active,
    Unavailable {
        until: Instant,
        reason: UnavailableReason,
    },
}

impl AccountState {
    pub fn is_active(&self) -> bool {
        matches!(self, AccountState::Active)
    }

    pub fn unavailable_until(&self) -> Option<Instant> {
        match self {
            AccountState::Unavailable { until, .. } => Some(*until),
            AccountState::Active => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    RateLimit,
    Timeout,
    Upstream5xx,
    AuthInvalid,
    ModelDisallow,
    Manual,
    Unknown,
}
