//! The payment verification pipeline. Checks run in protocol order and the
//! first failure is terminal; a payment is never partially accepted.

use chrono::{DateTime, Utc};

use ace_core::challenge::verify_challenge;
use ace_core::payment::{
    IdempotencyInputs, SignedPayment, derive_challenge_hash, derive_idempotency_key,
    format_address,
};
use ace_core::types::{ACE_PAYMENT_VERSION, CURRENCY, parse_rfc3339};

/// One reason a presented payment is rejected with `422 invalid_payment`.
#[derive(Debug, thiserror::Error)]
pub enum InvalidPayment {
    #[error("unsupported payment version: {0}")]
    Version(String),

    #[error("unsupported currency: {0}")]
    Currency(String),

    #[error("challengeId does not match the embedded challenge")]
    ChallengeIdMismatch,

    #[error("challenge is bound to {challenge}, request targets {request}")]
    ResourceMismatch { challenge: String, request: String },

    #[error("challenge method {challenge} does not match request method {request}")]
    MethodMismatch { challenge: String, request: String },

    #[error("challengeHash does not match the embedded challenge")]
    ChallengeHashMismatch,

    #[error("requestHash does not match this request")]
    RequestHashMismatch,

    #[error("challenge MAC verification failed")]
    BadMac,

    #[error("challenge expired at {0}")]
    ChallengeExpired(String),

    #[error("idempotencyKey does not match its inputs")]
    IdempotencyKeyMismatch,

    #[error("amount {presented} does not match the required {required}")]
    WrongAmount { presented: u64, required: u64 },

    #[error("session expired at {0}")]
    SessionExpired(String),

    #[error("signature does not recover to the payer: {0}")]
    BadSignature(String),

    #[error("malformed payment: {0}")]
    Malformed(String),
}

/// What the live request looks like to the verifier.
#[derive(Debug, Clone)]
pub struct VerifyContext<'a> {
    /// Uppercase HTTP verb of the current request.
    pub method: &'a str,
    /// Path and query of the current request.
    pub resource: &'a str,
    /// Request hash recomputed from the current request.
    pub request_hash: &'a str,
    pub amount_microusdc: u64,
    pub challenge_secret: &'a str,
    pub now: DateTime<Utc>,
}

/// Run the full pipeline against `payment`.
pub fn verify_payment(
    payment: &SignedPayment,
    ctx: &VerifyContext<'_>,
) -> Result<(), InvalidPayment> {
    let p = &payment.payload;

    if p.version != ACE_PAYMENT_VERSION {
        return Err(InvalidPayment::Version(p.version.clone()));
    }
    if p.currency != CURRENCY {
        return Err(InvalidPayment::Currency(p.currency.clone()));
    }
    if p.challenge_id != p.challenge.challenge_id {
        return Err(InvalidPayment::ChallengeIdMismatch);
    }
    if p.challenge.resource != ctx.resource {
        return Err(InvalidPayment::ResourceMismatch {
            challenge: p.challenge.resource.clone(),
            request: ctx.resource.to_string(),
        });
    }
    if p.challenge.method != ctx.method {
        return Err(InvalidPayment::MethodMismatch {
            challenge: p.challenge.method.clone(),
            request: ctx.method.to_string(),
        });
    }

    let challenge_hash = derive_challenge_hash(&p.challenge)
        .map_err(|err| InvalidPayment::Malformed(err.to_string()))?;
    if p.challenge_hash != challenge_hash {
        return Err(InvalidPayment::ChallengeHashMismatch);
    }
    if p.request_hash != ctx.request_hash {
        return Err(InvalidPayment::RequestHashMismatch);
    }
    if !verify_challenge(&p.challenge, ctx.challenge_secret) {
        return Err(InvalidPayment::BadMac);
    }

    let challenge_expires = parse_rfc3339(&p.challenge.expires_at)
        .map_err(|err| InvalidPayment::Malformed(err.to_string()))?;
    if challenge_expires <= ctx.now {
        return Err(InvalidPayment::ChallengeExpired(
            p.challenge.expires_at.clone(),
        ));
    }

    let expected_key = derive_idempotency_key(&IdempotencyInputs {
        session_id: &p.session_id,
        payer: &p.payer,
        challenge_id: &p.challenge_id,
        request_hash: &p.request_hash,
        amount_microusdc: p.amount_microusdc,
    });
    if p.idempotency_key != expected_key {
        return Err(InvalidPayment::IdempotencyKeyMismatch);
    }
    if p.amount_microusdc != ctx.amount_microusdc {
        return Err(InvalidPayment::WrongAmount {
            presented: p.amount_microusdc,
            required: ctx.amount_microusdc,
        });
    }

    let session_expires = parse_rfc3339(&p.session_expires_at)
        .map_err(|err| InvalidPayment::Malformed(err.to_string()))?;
    if session_expires <= ctx.now {
        return Err(InvalidPayment::SessionExpired(p.session_expires_at.clone()));
    }

    let recovered = payment
        .recover_payer()
        .map_err(|err| InvalidPayment::BadSignature(err.to_string()))?;
    let recovered = format_address(&recovered);
    if recovered != p.payer.to_lowercase() {
        return Err(InvalidPayment::BadSignature(format!(
            "recovered {recovered}, payer is {}",
            p.payer
        )));
    }

    Ok(())
}
