use crate::store::StoreError;

/// Failures raised by the session ledger before or while signing. All of
/// these surface before any retry is attempted.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session expired at {expires_at}")]
    SessionExpired { expires_at: String },

    #[error("challenge rejected: {0}")]
    ChallengeRejected(String),

    #[error("challenge does not match the request: {0}")]
    ChallengeMismatch(String),

    #[error("spend limit exceeded: requested {requested}, available {available}")]
    SpendLimitExceeded { requested: u64, available: u64 },

    #[error("session ttl must be positive")]
    InvalidTtl,

    #[error("session {session_id} belongs to {stored}, not {requested}")]
    PayerMismatch {
        session_id: String,
        stored: String,
        requested: String,
    },

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("wallet signing failed: {0}")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] ace_core::Error),
}

/// Interceptor failure: signing-stage errors pass through unchanged, while
/// transport failures on the paid retry release the pending attempt first.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError<E: std::error::Error> {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("transport error: {0}")]
    Transport(#[source] E),
}
