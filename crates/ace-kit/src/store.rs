//! Session persistence. One entry per session, loaded whole and rewritten
//! whole on every ledger mutation.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use ace_core::payment::SignedPayment;
use ace_core::types::Record;

/// Persisted accounting state of one spending session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    /// Lowercase hex wallet address.
    pub payer: String,
    pub spend_limit_microusdc: u64,
    pub created_at: String,
    pub expires_at: String,
    pub cumulative_spend_microusdc: u64,
    /// Full signed payments keyed by idempotency key, so a restart can
    /// still return them verbatim.
    pub pending_attempts: Record<SignedPayment>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Two-method persistence capability consumed by the session ledger.
pub trait SessionStore {
    fn load(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<SessionState>, StoreError>>;

    fn save(
        &self,
        session_id: &str,
        state: &SessionState,
    ) -> impl Future<Output = Result<(), StoreError>>;
}

impl<S: SessionStore> SessionStore for &S {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        (**self).load(session_id).await
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        (**self).save(session_id, state).await
    }
}

/// Process-local store; load and save both copy, isolating callers from
/// later mutation.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Record<SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session_id.to_string(), state.clone());
        Ok(())
    }
}

/// One JSON file per session under `base_dir`, rewritten atomically via a
/// temp file and rename.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    base_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.json"))
    }
}

impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        match tokio::fs::read(self.session_path(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.session_path(session_id);
        let tmp = path.with_extension("json.tmp");
        let mut json = serde_json::to_string_pretty(state)?;
        json.push('\n');
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
