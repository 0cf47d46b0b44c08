//! The session ledger: spend accounting, pending attempts, and the signing
//! gate for payment challenges.

use chrono::{DateTime, Duration, Utc};
use url::Url;

use ace_core::challenge::PaymentChallenge;
use ace_core::payment::{
    IdempotencyInputs, SignedPayment, UnsignedPayment, derive_challenge_hash,
    derive_idempotency_key, derive_request_hash, derive_resource, format_address, signing_message,
};
use ace_core::types::{ACE_PAYMENT_VERSION, CURRENCY, Record, format_rfc3339, parse_rfc3339, random_hex};

use crate::errors::SessionError;
use crate::signer::PaymentSigner;
use crate::store::{SessionState, SessionStore};

/// One HTTP request about to carry a payment.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub url: Url,
    /// Only string bodies are bound into the payment; streaming bodies must
    /// be materialized by the caller first.
    pub body: Option<String>,
}

/// Read-only view of session accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub payer: String,
    pub spend_limit_microusdc: u64,
    pub expires_at: String,
    pub cumulative_spend_microusdc: u64,
    pub pending_spend_microusdc: u64,
    pub available_spend_microusdc: u64,
}

/// A spending session bound to one wallet, one limit, and one store entry.
/// Every state transition persists before returning.
pub struct PaymentSession<W, S> {
    wallet: W,
    store: S,
    state: SessionState,
}

#[bon::bon]
impl<W: PaymentSigner, S: SessionStore> PaymentSession<W, S> {
    /// Authorize a new spending session. When `session_id` names a stored
    /// session of the same payer, the ledger rebinds to it and the stored
    /// parameters win; a stored session of another payer is an error.
    #[builder]
    pub async fn create(
        wallet: W,
        store: S,
        spend_limit_microusdc: u64,
        ttl_seconds: i64,
        session_id: Option<String>,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self, SessionError> {
        if ttl_seconds <= 0 {
            return Err(SessionError::InvalidTtl);
        }
        let payer = format_address(&wallet.payer_address());
        let session_id = session_id.unwrap_or_else(|| format!("sess_{}", random_hex()));

        if let Some(state) = store.load(&session_id).await? {
            if state.payer != payer {
                return Err(SessionError::PayerMismatch {
                    session_id,
                    stored: state.payer,
                    requested: payer,
                });
            }
            tracing::info!(session_id = %state.session_id, "rebound to existing session");
            return Ok(Self {
                wallet,
                store,
                state,
            });
        }

        let now = now.unwrap_or_else(Utc::now);
        let state = SessionState {
            session_id: session_id.clone(),
            payer,
            spend_limit_microusdc,
            created_at: format_rfc3339(now),
            expires_at: format_rfc3339(now + Duration::seconds(ttl_seconds)),
            cumulative_spend_microusdc: 0,
            pending_attempts: Record::new(),
        };
        store.save(&session_id, &state).await?;
        tracing::info!(
            session_id = %state.session_id,
            spend_limit = spend_limit_microusdc,
            "authorized session"
        );
        Ok(Self {
            wallet,
            store,
            state,
        })
    }
}

impl<W: PaymentSigner, S: SessionStore> PaymentSession<W, S> {
    /// Bind to a previously persisted session of the same payer.
    pub async fn restore(wallet: W, store: S, session_id: &str) -> Result<Self, SessionError> {
        let state = store
            .load(session_id)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        let payer = format_address(&wallet.payer_address());
        if state.payer != payer {
            return Err(SessionError::PayerMismatch {
                session_id: session_id.to_string(),
                stored: state.payer,
                requested: payer,
            });
        }
        Ok(Self {
            wallet,
            store,
            state,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let pending = self.pending_spend();
        SessionSnapshot {
            session_id: self.state.session_id.clone(),
            payer: self.state.payer.clone(),
            spend_limit_microusdc: self.state.spend_limit_microusdc,
            expires_at: self.state.expires_at.clone(),
            cumulative_spend_microusdc: self.state.cumulative_spend_microusdc,
            pending_spend_microusdc: pending,
            available_spend_microusdc: self
                .state
                .spend_limit_microusdc
                .saturating_sub(self.state.cumulative_spend_microusdc)
                .saturating_sub(pending),
        }
    }

    fn pending_spend(&self) -> u64 {
        self.state
            .pending_attempts
            .values()
            .map(|attempt| attempt.payload.amount_microusdc)
            .sum()
    }

    /// Sign a payment authorization for `challenge`, gated by session
    /// expiry, challenge validity, and the spend limit. Re-entry with the
    /// same logical attempt returns the stored payment without re-signing
    /// or mutating state.
    pub async fn sign_for_challenge(
        &mut self,
        challenge: &PaymentChallenge,
        request: &RequestContext,
    ) -> Result<SignedPayment, SessionError> {
        let now = Utc::now();
        if parse_rfc3339(&self.state.expires_at)? <= now {
            return Err(SessionError::SessionExpired {
                expires_at: self.state.expires_at.clone(),
            });
        }

        if challenge.version != ACE_PAYMENT_VERSION {
            return Err(SessionError::ChallengeRejected(format!(
                "unsupported version {}",
                challenge.version
            )));
        }
        if challenge.currency != CURRENCY {
            return Err(SessionError::ChallengeRejected(format!(
                "unsupported currency {}",
                challenge.currency
            )));
        }
        if parse_rfc3339(&challenge.expires_at)? <= now {
            return Err(SessionError::ChallengeRejected(format!(
                "challenge expired at {}",
                challenge.expires_at
            )));
        }

        let method = request.method.to_ascii_uppercase();
        if challenge.method != method {
            return Err(SessionError::ChallengeMismatch(format!(
                "challenge is for {}, request method is {method}",
                challenge.method
            )));
        }
        let resource = derive_resource(&request.url);
        if challenge.resource != resource {
            return Err(SessionError::ChallengeMismatch(format!(
                "challenge is for {}, request targets {resource}",
                challenge.resource
            )));
        }

        let request_hash = derive_request_hash(&method, &resource, request.body.as_deref());
        let idempotency_key = derive_idempotency_key(&IdempotencyInputs {
            session_id: &self.state.session_id,
            payer: &self.state.payer,
            challenge_id: &challenge.challenge_id,
            request_hash: &request_hash,
            amount_microusdc: challenge.amount_microusdc,
        });

        // At most one signature per logical attempt, even across retries.
        if let Some(existing) = self.state.pending_attempts.get(&idempotency_key) {
            tracing::debug!(%idempotency_key, "returning pending attempt unchanged");
            return Ok(existing.clone());
        }

        let available = self.snapshot().available_spend_microusdc;
        if challenge.amount_microusdc > available {
            return Err(SessionError::SpendLimitExceeded {
                requested: challenge.amount_microusdc,
                available,
            });
        }

        let unsigned = UnsignedPayment {
            version: ACE_PAYMENT_VERSION.to_string(),
            session_id: self.state.session_id.clone(),
            payer: self.state.payer.clone(),
            challenge_id: challenge.challenge_id.clone(),
            challenge: challenge.clone(),
            idempotency_key: idempotency_key.clone(),
            request_hash,
            challenge_hash: derive_challenge_hash(challenge)?,
            amount_microusdc: challenge.amount_microusdc,
            currency: CURRENCY.to_string(),
            session_expires_at: self.state.expires_at.clone(),
            issued_at: format_rfc3339(now),
        };
        let message = signing_message(&unsigned)?;
        let signature = self
            .wallet
            .sign_payment_message(message.as_bytes())
            .await
            .map_err(|err| SessionError::Signer(Box::new(err)))?;
        let signed = SignedPayment {
            payload: unsigned,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        };

        self.state
            .pending_attempts
            .insert(idempotency_key.clone(), signed.clone());
        self.store.save(&self.state.session_id, &self.state).await?;
        tracing::debug!(
            %idempotency_key,
            amount = challenge.amount_microusdc,
            "signed payment attempt"
        );
        Ok(signed)
    }

    /// Move a pending attempt into cumulative spend. Unknown keys are
    /// no-ops.
    pub async fn commit_payment(&mut self, idempotency_key: &str) -> Result<(), SessionError> {
        let Some(attempt) = self.state.pending_attempts.remove(idempotency_key) else {
            return Ok(());
        };
        self.state.cumulative_spend_microusdc = self
            .state
            .cumulative_spend_microusdc
            .saturating_add(attempt.payload.amount_microusdc);
        self.store.save(&self.state.session_id, &self.state).await?;
        tracing::debug!(
            %idempotency_key,
            cumulative = self.state.cumulative_spend_microusdc,
            "committed payment"
        );
        Ok(())
    }

    /// Drop a pending attempt, returning its reserved spend. Unknown keys
    /// are no-ops.
    pub async fn release_payment(&mut self, idempotency_key: &str) -> Result<(), SessionError> {
        if self
            .state
            .pending_attempts
            .remove(idempotency_key)
            .is_none()
        {
            return Ok(());
        }
        self.store.save(&self.state.session_id, &self.state).await?;
        tracing::debug!(%idempotency_key, "released pending payment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_signer_local::PrivateKeySigner;

    use ace_core::challenge::create_challenge;
    use ace_core::types::format_rfc3339;

    use crate::store::MemorySessionStore;

    use super::*;

    fn challenge_for(resource: &str, method: &str, amount: u64) -> PaymentChallenge {
        let now = Utc::now();
        create_challenge()
            .secret("origin-secret")
            .resource(resource)
            .method(method)
            .amount_microusdc(amount)
            .issued_at(format_rfc3339(now))
            .expires_at(format_rfc3339(now + Duration::minutes(5)))
            .call()
            .unwrap()
    }

    fn request(url: &str) -> RequestContext {
        RequestContext {
            method: "GET".to_string(),
            url: Url::parse(url).unwrap(),
            body: None,
        }
    }

    async fn session(limit: u64) -> PaymentSession<PrivateKeySigner, MemorySessionStore> {
        PaymentSession::create()
            .wallet(PrivateKeySigner::random())
            .store(MemorySessionStore::new())
            .spend_limit_microusdc(limit)
            .ttl_seconds(86_400)
            .call()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_session_starts_zeroed() {
        let session = session(5_000_000).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.cumulative_spend_microusdc, 0);
        assert_eq!(snapshot.pending_spend_microusdc, 0);
        assert_eq!(snapshot.available_spend_microusdc, 5_000_000);
        assert!(snapshot.session_id.starts_with("sess_"));
        assert!(snapshot.payer.starts_with("0x"));
    }

    #[tokio::test]
    async fn rejects_non_positive_ttl() {
        let result = PaymentSession::create()
            .wallet(PrivateKeySigner::random())
            .store(MemorySessionStore::new())
            .spend_limit_microusdc(1)
            .ttl_seconds(0)
            .call()
            .await;
        assert!(matches!(result, Err(SessionError::InvalidTtl)));
    }

    #[tokio::test]
    async fn reuse_keeps_stored_parameters() {
        let wallet = PrivateKeySigner::random();
        let store = MemorySessionStore::new();
        let first = PaymentSession::create()
            .wallet(wallet.clone())
            .store(&store)
            .spend_limit_microusdc(5_000_000)
            .ttl_seconds(86_400)
            .session_id("sess_shared".to_string())
            .call()
            .await
            .unwrap();
        let original_expiry = first.snapshot().expires_at;

        let rebound = PaymentSession::create()
            .wallet(wallet)
            .store(&store)
            .spend_limit_microusdc(99)
            .ttl_seconds(1)
            .session_id("sess_shared".to_string())
            .call()
            .await
            .unwrap();
        let snapshot = rebound.snapshot();
        assert_eq!(snapshot.spend_limit_microusdc, 5_000_000);
        assert_eq!(snapshot.expires_at, original_expiry);
    }

    #[tokio::test]
    async fn reuse_by_another_payer_fails() {
        let store = MemorySessionStore::new();
        PaymentSession::create()
            .wallet(PrivateKeySigner::random())
            .store(&store)
            .spend_limit_microusdc(1)
            .ttl_seconds(60)
            .session_id("sess_shared".to_string())
            .call()
            .await
            .unwrap();

        let result = PaymentSession::create()
            .wallet(PrivateKeySigner::random())
            .store(&store)
            .spend_limit_microusdc(1)
            .ttl_seconds(60)
            .session_id("sess_shared".to_string())
            .call()
            .await;
        assert!(matches!(result, Err(SessionError::PayerMismatch { .. })));
    }

    #[tokio::test]
    async fn restore_requires_existing_state() {
        let result = PaymentSession::restore(
            PrivateKeySigner::random(),
            MemorySessionStore::new(),
            "sess_missing",
        )
        .await;
        assert!(matches!(result, Err(SessionError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn signing_reserves_and_committing_settles() {
        let mut session = session(5_000_000).await;
        let challenge = challenge_for("/compute?task=demo", "GET", 250_000);
        let signed = session
            .sign_for_challenge(&challenge, &request("https://api.example.com/compute?task=demo"))
            .await
            .unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.pending_spend_microusdc, 250_000);
        assert_eq!(snapshot.available_spend_microusdc, 4_750_000);
        assert_eq!(snapshot.cumulative_spend_microusdc, 0);

        session
            .commit_payment(&signed.payload.idempotency_key)
            .await
            .unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.cumulative_spend_microusdc, 250_000);
        assert_eq!(snapshot.pending_spend_microusdc, 0);
        assert_eq!(snapshot.available_spend_microusdc, 4_750_000);
    }

    #[tokio::test]
    async fn release_returns_reserved_spend() {
        let mut session = session(5_000_000).await;
        let challenge = challenge_for("/compute", "GET", 250_000);
        let signed = session
            .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
            .await
            .unwrap();

        session
            .release_payment(&signed.payload.idempotency_key)
            .await
            .unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.cumulative_spend_microusdc, 0);
        assert_eq!(snapshot.available_spend_microusdc, 5_000_000);
    }

    #[tokio::test]
    async fn commit_and_release_are_idempotent() {
        let mut session = session(5_000_000).await;
        session.commit_payment("aceid_unknown").await.unwrap();
        session.release_payment("aceid_unknown").await.unwrap();
        assert_eq!(session.snapshot().cumulative_spend_microusdc, 0);
    }

    #[tokio::test]
    async fn re_signing_the_same_attempt_is_idempotent() {
        let mut session = session(5_000_000).await;
        let challenge = challenge_for("/compute?task=demo", "GET", 250_000);
        let context = request("https://api.example.com/compute?task=demo");

        let first = session.sign_for_challenge(&challenge, &context).await.unwrap();
        let second = session.sign_for_challenge(&challenge, &context).await.unwrap();

        assert_eq!(first, second);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.pending_spend_microusdc, 250_000);
    }

    #[tokio::test]
    async fn spend_limit_blocks_before_signing() {
        let mut session = session(200_000).await;
        let challenge = challenge_for("/compute", "GET", 250_000);
        let result = session
            .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
            .await;
        assert!(matches!(
            result,
            Err(SessionError::SpendLimitExceeded {
                requested: 250_000,
                available: 200_000,
            })
        ));
        assert_eq!(session.snapshot().pending_spend_microusdc, 0);
    }

    #[tokio::test]
    async fn pending_attempts_count_against_the_limit() {
        let mut session = session(400_000).await;
        let first = challenge_for("/compute?task=a", "GET", 250_000);
        session
            .sign_for_challenge(&first, &request("https://api.example.com/compute?task=a"))
            .await
            .unwrap();

        let second = challenge_for("/compute?task=b", "GET", 250_000);
        let result = session
            .sign_for_challenge(&second, &request("https://api.example.com/compute?task=b"))
            .await;
        assert!(matches!(result, Err(SessionError::SpendLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn expired_session_refuses_to_sign() {
        let mut session = PaymentSession::create()
            .wallet(PrivateKeySigner::random())
            .store(MemorySessionStore::new())
            .spend_limit_microusdc(5_000_000)
            .ttl_seconds(60)
            .now(Utc::now() - Duration::hours(1))
            .call()
            .await
            .unwrap();
        let challenge = challenge_for("/compute", "GET", 1);
        let result = session
            .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
            .await;
        assert!(matches!(result, Err(SessionError::SessionExpired { .. })));
    }

    #[tokio::test]
    async fn foreign_or_expired_challenges_are_rejected() {
        let mut session = session(5_000_000).await;
        let context = request("https://api.example.com/compute");

        let mut challenge = challenge_for("/compute", "GET", 1);
        challenge.version = "other-v1".to_string();
        assert!(matches!(
            session.sign_for_challenge(&challenge, &context).await,
            Err(SessionError::ChallengeRejected(_))
        ));

        let mut challenge = challenge_for("/compute", "GET", 1);
        challenge.currency = "EURC".to_string();
        assert!(matches!(
            session.sign_for_challenge(&challenge, &context).await,
            Err(SessionError::ChallengeRejected(_))
        ));

        let now = Utc::now();
        let challenge = create_challenge()
            .secret("origin-secret")
            .resource("/compute")
            .method("GET")
            .amount_microusdc(1)
            .issued_at(format_rfc3339(now - Duration::minutes(10)))
            .expires_at(format_rfc3339(now - Duration::minutes(5)))
            .call()
            .unwrap();
        assert!(matches!(
            session.sign_for_challenge(&challenge, &context).await,
            Err(SessionError::ChallengeRejected(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_method_or_resource_is_refused() {
        let mut session = session(5_000_000).await;

        let challenge = challenge_for("/compute", "POST", 1);
        assert!(matches!(
            session
                .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
                .await,
            Err(SessionError::ChallengeMismatch(_))
        ));

        let challenge = challenge_for("/other", "GET", 1);
        assert!(matches!(
            session
                .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
                .await,
            Err(SessionError::ChallengeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn pending_attempts_survive_a_restore() {
        let wallet = PrivateKeySigner::random();
        let store = MemorySessionStore::new();
        let challenge = challenge_for("/compute", "GET", 250_000);
        let context = request("https://api.example.com/compute");

        let mut session = PaymentSession::create()
            .wallet(wallet.clone())
            .store(&store)
            .spend_limit_microusdc(5_000_000)
            .ttl_seconds(86_400)
            .session_id("sess_restart".to_string())
            .call()
            .await
            .unwrap();
        let signed = session.sign_for_challenge(&challenge, &context).await.unwrap();
        drop(session);

        // After a "restart", the attempt still reserves spend and re-signing
        // returns the stored payment byte for byte.
        let mut restored = PaymentSession::restore(wallet, &store, "sess_restart")
            .await
            .unwrap();
        assert_eq!(restored.snapshot().pending_spend_microusdc, 250_000);
        let replayed = restored.sign_for_challenge(&challenge, &context).await.unwrap();
        assert_eq!(replayed, signed);
    }

    #[tokio::test]
    async fn signed_payment_recovers_to_the_session_payer() {
        let mut session = session(5_000_000).await;
        let challenge = challenge_for("/compute", "GET", 250_000);
        let signed = session
            .sign_for_challenge(&challenge, &request("https://api.example.com/compute"))
            .await
            .unwrap();

        let recovered = signed.recover_payer().unwrap();
        assert_eq!(format_address(&recovered), session.snapshot().payer);
        assert_eq!(signed.payload.challenge, challenge);
        assert_eq!(signed.payload.amount_microusdc, 250_000);
    }
}
