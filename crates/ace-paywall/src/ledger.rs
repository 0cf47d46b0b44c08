//! The origin's payment ledger: an append-only map from idempotency key to
//! settled payment, persisted as one JSON file with atomic rewrites.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use ace_core::types::{AnyJson, Record};

/// One settled payment. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLogRecord {
    pub idempotency_key: String,
    pub payer: String,
    pub amount_microusdc: u64,
    pub request_hash: String,
    pub challenge_id: String,
    pub paid_at: String,
    pub result: AnyJson,
}

/// The fields a replay must match against the stored record.
#[derive(Debug, Clone)]
pub struct PaymentClaim {
    pub idempotency_key: String,
    pub payer: String,
    pub amount_microusdc: u64,
    pub request_hash: String,
    pub challenge_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("payment ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payment ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("idempotency key {0} was already paid with different parameters")]
    Conflict(String),
}

/// Outcome of [`PaymentLog::settle`].
#[derive(Debug, Clone)]
pub struct Settlement {
    pub record: PaymentLogRecord,
    pub replayed: bool,
}

/// File-backed payment ledger. One lock serializes the replay check and the
/// insert, so concurrent retries of the same key cannot both compute.
#[derive(Debug)]
pub struct PaymentLog {
    path: PathBuf,
    entries: Mutex<Record<PaymentLogRecord>>,
}

impl PaymentLog {
    /// Load the ledger at `path`, starting empty when the file is absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Record::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Replay a matching settled payment, or run `compute` and persist its
    /// result as a fresh record. A replay whose `{payer, amount,
    /// requestHash}` differ from the stored record is a conflict.
    pub async fn settle(
        &self,
        claim: PaymentClaim,
        paid_at: String,
        compute: impl FnOnce() -> AnyJson,
    ) -> Result<Settlement, LedgerError> {
        let mut entries = self.entries.lock().await;

        if let Some(record) = entries.get(&claim.idempotency_key) {
            if record.payer != claim.payer
                || record.amount_microusdc != claim.amount_microusdc
                || record.request_hash != claim.request_hash
            {
                return Err(LedgerError::Conflict(claim.idempotency_key));
            }
            tracing::debug!(
                idempotency_key = %claim.idempotency_key,
                "replaying settled payment"
            );
            return Ok(Settlement {
                record: record.clone(),
                replayed: true,
            });
        }

        let record = PaymentLogRecord {
            idempotency_key: claim.idempotency_key.clone(),
            payer: claim.payer,
            amount_microusdc: claim.amount_microusdc,
            request_hash: claim.request_hash,
            challenge_id: claim.challenge_id,
            paid_at,
            result: compute(),
        };
        entries.insert(claim.idempotency_key.clone(), record.clone());
        self.persist(&entries).await?;
        tracing::info!(
            idempotency_key = %claim.idempotency_key,
            amount = record.amount_microusdc,
            "recorded payment"
        );
        Ok(Settlement {
            record,
            replayed: false,
        })
    }

    async fn persist(&self, entries: &Record<PaymentLogRecord>) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut json = serde_json::to_string_pretty(entries)?;
        json.push('\n');
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
