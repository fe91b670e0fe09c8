use chrono::{DateTime, Utc};

use crate::domain::UserId;

/// Which quota policy refused an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaKind {
    Monthly,
    Daily,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::Monthly => f.write_str("monthly"),
            QuotaKind::Daily => f.write_str("daily"),
        }
    }
}

/// Core error type.
///
/// Refusals (`DuplicateRequest`, `NotFound`, `QuotaExceeded`, `Banned`) are
/// informational and scoped to the request that caused them. Only the
/// persistence class indicates a storage-layer malfunction; see
/// [`Error::is_operational`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("user {0} already has a queued request")]
    DuplicateRequest(UserId),

    #[error("user {0} has no queued request")]
    NotFound(UserId),

    #[error("{kind} quota exceeded")]
    QuotaExceeded {
        kind: QuotaKind,
        retry_at: Option<DateTime<Utc>>,
    },

    #[error("unrecognized reviewer decision: {0:?}")]
    InvalidDecision(String),

    #[error("user {0} is banned")]
    Banned(UserId),

    #[error("security violation: {0}")]
    Security(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for failures that should be logged as operational errors.
    pub fn is_operational(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Io(_) | Error::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_operational() {
        assert!(Error::Persistence("disk full".into()).is_operational());
        assert!(Error::Io(std::io::Error::other("boom")).is_operational());
        assert!(!Error::DuplicateRequest(UserId(1)).is_operational());
        assert!(!Error::QuotaExceeded {
            kind: QuotaKind::Daily,
            retry_at: None
        }
        .is_operational());
        assert!(!Error::Banned(UserId(1)).is_operational());
    }
}
