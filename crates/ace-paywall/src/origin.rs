//! The origin's verifying front door: issues challenges for unpaid
//! requests, verifies presented payments, and settles them against the
//! payment ledger.

use chrono::{Duration, Utc};
use http::{HeaderMap, Method};
use serde_json::json;

use ace_core::challenge::{PaymentChallenge, create_challenge};
use ace_core::payment::{SignedPayment, derive_request_hash};
use ace_core::transport::{PaidBody, PaidReceipt, PaymentOffer, PaymentRequired, SettlementAck};
use ace_core::types::{
    Base64EncodedHeader, CURRENCY, HEADER_ACE_PAYMENT, HEADER_PAYMENT_SIGNATURE, HEADER_X_PAYMENT,
    X402Version, format_rfc3339,
};

use crate::config::OriginConfig;
use crate::errors::ErrorResponse;
use crate::ledger::{LedgerError, PaymentClaim, PaymentLog, Settlement};
use crate::verify::{VerifyContext, verify_payment};

/// A successful paid response: body plus the headers to attach.
#[derive(Debug, Clone)]
pub struct PaidResponse {
    pub body: PaidBody,
    /// The request's `PAYMENT-SIGNATURE` value, echoed back verbatim.
    pub payment_signature: String,
    /// The `PAYMENT-RESPONSE` settlement acknowledgment.
    pub settlement: Base64EncodedHeader,
    pub idempotency_key: String,
}

pub struct Origin {
    config: OriginConfig,
    ledger: PaymentLog,
}

impl Origin {
    /// Open the payment ledger named by `config` and build the origin.
    pub async fn open(config: OriginConfig) -> Result<Self, LedgerError> {
        let ledger = PaymentLog::open(config.ledger_path.clone()).await?;
        Ok(Self { config, ledger })
    }

    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    /// Issue a fresh challenge bound to this resource and method.
    pub fn challenge_for(&self, method: &str, resource: &str) -> ace_core::Result<PaymentChallenge> {
        let now = Utc::now();
        create_challenge()
            .secret(&self.config.challenge_secret)
            .resource(resource)
            .method(method)
            .amount_microusdc(self.config.amount_microusdc)
            .issued_at(format_rfc3339(now))
            .expires_at(format_rfc3339(
                now + Duration::seconds(self.config.challenge_ttl_seconds),
            ))
            .call()
    }

    /// The full 402 reply for an unpaid request.
    pub fn payment_required(&self, method: &str, resource: &str) -> ErrorResponse {
        match self.challenge_for(method, resource) {
            Ok(challenge) => {
                let envelope = PaymentRequired {
                    x402_version: X402Version::V2,
                    error: "payment_required".to_string(),
                    accepts: vec![PaymentOffer {
                        scheme: "exact".to_string(),
                        network: self.config.network.clone(),
                        amount: challenge.amount_microusdc.to_string(),
                        asset: CURRENCY.to_string(),
                        pay_to: self.config.pay_to.clone(),
                        extra: Some(json!({ "challenge": challenge })),
                    }],
                };
                ErrorResponse::payment_required(&envelope, &challenge)
            }
            Err(err) => ErrorResponse::server_error(err),
        }
    }

    /// Handle a request to a protected resource end to end: challenge when
    /// unpaid, verify and settle when paid.
    pub async fn handle(
        &self,
        method: &Method,
        resource: &str,
        headers: &HeaderMap,
        body: Option<&str>,
        compute: impl FnOnce() -> ace_core::types::AnyJson,
    ) -> Result<PaidResponse, ErrorResponse> {
        let method = method.as_str().to_ascii_uppercase();

        let Some(raw) = payment_header(headers) else {
            tracing::debug!(%resource, "unpaid request, issuing challenge");
            return Err(self.payment_required(&method, resource));
        };
        let raw = raw
            .map_err(|_| ErrorResponse::invalid_payment("payment header is not valid ASCII"))?;
        let payment = SignedPayment::try_from(&Base64EncodedHeader(raw.to_string()))
            .map_err(|err| ErrorResponse::invalid_payment(format!("failed to decode payment: {err}")))?;

        let request_hash = derive_request_hash(&method, resource, body);
        let ctx = VerifyContext {
            method: &method,
            resource,
            request_hash: &request_hash,
            amount_microusdc: self.config.amount_microusdc,
            challenge_secret: &self.config.challenge_secret,
            now: Utc::now(),
        };
        verify_payment(&payment, &ctx).map_err(|err| {
            tracing::debug!(error = %err, "rejected payment");
            ErrorResponse::invalid_payment(err)
        })?;

        let claim = PaymentClaim {
            idempotency_key: payment.payload.idempotency_key.clone(),
            payer: payment.payload.payer.to_lowercase(),
            amount_microusdc: payment.payload.amount_microusdc,
            request_hash,
            challenge_id: payment.payload.challenge_id.clone(),
        };
        let Settlement { record, replayed } = self
            .ledger
            .settle(claim, format_rfc3339(Utc::now()), compute)
            .await
            .map_err(|err| match err {
                LedgerError::Conflict(key) => ErrorResponse::conflict(&key),
                other => ErrorResponse::server_error(other),
            })?;

        let ack = SettlementAck {
            x402_version: X402Version::V2,
            settled: true,
            idempotency_key: record.idempotency_key.clone(),
        };
        let settlement = Base64EncodedHeader::try_from(&ack)
            .map_err(ErrorResponse::server_error)?;

        Ok(PaidResponse {
            body: PaidBody {
                status: "ok".to_string(),
                replayed,
                result: record.result.clone(),
                payment: PaidReceipt {
                    idempotency_key: record.idempotency_key.clone(),
                    amount_microusdc: record.amount_microusdc,
                },
            },
            payment_signature: raw.to_string(),
            settlement,
            idempotency_key: record.idempotency_key,
        })
    }
}

/// First payment header present, under any accepted spelling.
fn payment_header(headers: &HeaderMap) -> Option<Result<&str, http::header::ToStrError>> {
    [
        HEADER_PAYMENT_SIGNATURE,
        HEADER_X_PAYMENT,
        HEADER_ACE_PAYMENT,
    ]
    .iter()
    .find_map(|name| headers.get(*name))
    .map(|value| value.to_str())
}
