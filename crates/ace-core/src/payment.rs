//! Payment authorizations and the deterministic derivations that tie one
//! signed payment to one session, one challenge, and one request.

use alloy_primitives::{Address, Signature};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::canonical::{canonical_json, sha256_hex};
use crate::challenge::PaymentChallenge;
use crate::errors::{Error, Result};
use crate::types::{IDEMPOTENCY_KEY_PREFIX, SIGNING_PREFIX};

/// The payer's authorization of one payment attempt, before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedPayment {
    pub version: String,
    pub session_id: String,
    /// Lowercase hex wallet address.
    pub payer: String,
    pub challenge_id: String,
    /// Embedded by value so the payment verifies self-contained.
    pub challenge: PaymentChallenge,
    pub idempotency_key: String,
    pub request_hash: String,
    pub challenge_hash: String,
    pub amount_microusdc: u64,
    pub currency: String,
    pub session_expires_at: String,
    pub issued_at: String,
}

/// An [`UnsignedPayment`] plus its 65-byte recoverable secp256k1 signature
/// (hex) over the prefixed personal-sign message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayment {
    #[serde(flatten)]
    pub payload: UnsignedPayment,
    pub signature: String,
}

impl SignedPayment {
    pub fn parse_signature(&self) -> Result<Signature> {
        let raw = self.signature.trim_start_matches("0x");
        let bytes = hex::decode(raw).map_err(|err| Error::InvalidSignature(err.to_string()))?;
        Signature::from_raw(&bytes).map_err(|err| Error::InvalidSignature(err.to_string()))
    }

    /// Recover the address that personal-signed this payment.
    pub fn recover_payer(&self) -> Result<Address> {
        let message = signing_message(&self.payload)?;
        self.parse_signature()?
            .recover_address_from_msg(message.as_bytes())
            .map_err(|err| Error::InvalidSignature(err.to_string()))
    }
}

/// Lowercase hex form of an address, as used for `payer` fields.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Path plus query of `url`, exactly as given. No normalization.
pub fn derive_resource(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Hash binding a payment to the request it pays for. Only non-empty string
/// bodies contribute; anything else hashes as the empty body.
pub fn derive_request_hash(method: &str, resource: &str, body: Option<&str>) -> String {
    let body_hash = match body {
        Some(body) if !body.is_empty() => sha256_hex(body),
        _ => String::new(),
    };
    let value = json!({
        "bodyHash": body_hash,
        "method": method.to_ascii_uppercase(),
        "resource": resource,
    });
    sha256_hex(&canonical_json(&value))
}

/// Hash of the full issued challenge, MAC included: the signer authorizes
/// this specific issuance.
pub fn derive_challenge_hash(challenge: &PaymentChallenge) -> Result<String> {
    Ok(sha256_hex(&canonical_json(&serde_json::to_value(
        challenge,
    )?)))
}

/// The values that pin one logical payment attempt to a unique key.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyInputs<'a> {
    pub session_id: &'a str,
    pub payer: &'a str,
    pub challenge_id: &'a str,
    pub request_hash: &'a str,
    pub amount_microusdc: u64,
}

/// Deterministic `aceid_<hex>` key; stable across processes and restarts.
pub fn derive_idempotency_key(inputs: &IdempotencyInputs<'_>) -> String {
    let value = json!({
        "amountMicrousdc": inputs.amount_microusdc,
        "challengeId": inputs.challenge_id,
        "payer": inputs.payer.to_lowercase(),
        "requestHash": inputs.request_hash,
        "sessionId": inputs.session_id,
    });
    format!(
        "{IDEMPOTENCY_KEY_PREFIX}{}",
        sha256_hex(&canonical_json(&value))
    )
}

/// The exact bytes handed to the wallet for personal-sign.
pub fn signing_message(unsigned: &UnsignedPayment) -> Result<String> {
    Ok(format!(
        "{SIGNING_PREFIX}{}",
        canonical_json(&serde_json::to_value(unsigned)?)
    ))
}
