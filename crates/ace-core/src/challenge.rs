//! Server-issued payment challenges, bound to one resource access and
//! authenticated with an HMAC over their canonical form.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, hmac_sha256_hex, hmac_sha256_verify};
use crate::errors::{Error, Result};
use crate::types::{ACE_PAYMENT_VERSION, CURRENCY, parse_rfc3339, random_hex};

/// A MAC-authenticated token describing a single paid resource access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub version: String,
    pub challenge_id: String,
    /// Path and query of the protected URL, exactly as served.
    pub resource: String,
    pub method: String,
    pub amount_microusdc: u64,
    pub currency: String,
    pub issued_at: String,
    pub expires_at: String,
    pub nonce: String,
    /// Hex HMAC-SHA-256 over the challenge with this field omitted.
    pub mac: String,
}

impl PaymentChallenge {
    /// The exact bytes the MAC covers: canonical form with `mac` removed.
    pub fn mac_payload(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("mac");
        }
        Ok(canonical_json(&value))
    }
}

/// Build and MAC a challenge. `challenge_id` and `nonce` default to
/// independent 128-bit random values.
#[bon::builder]
pub fn create_challenge(
    secret: &str,
    resource: &str,
    method: &str,
    amount_microusdc: u64,
    issued_at: String,
    expires_at: String,
    challenge_id: Option<String>,
    nonce: Option<String>,
) -> Result<PaymentChallenge> {
    if amount_microusdc == 0 {
        return Err(Error::InvalidChallenge(
            "amountMicrousdc must be positive".to_string(),
        ));
    }
    if parse_rfc3339(&expires_at)? <= parse_rfc3339(&issued_at)? {
        return Err(Error::InvalidChallenge(
            "expiresAt must be after issuedAt".to_string(),
        ));
    }

    let mut challenge = PaymentChallenge {
        version: ACE_PAYMENT_VERSION.to_string(),
        challenge_id: challenge_id.unwrap_or_else(|| format!("ch_{}", random_hex())),
        resource: resource.to_string(),
        method: method.to_ascii_uppercase(),
        amount_microusdc,
        currency: CURRENCY.to_string(),
        issued_at,
        expires_at,
        nonce: nonce.unwrap_or_else(random_hex),
        mac: String::new(),
    };
    challenge.mac = hmac_sha256_hex(secret, &challenge.mac_payload()?)?;
    Ok(challenge)
}

/// Recompute the MAC and compare in constant time.
pub fn verify_challenge(challenge: &PaymentChallenge, secret: &str) -> bool {
    match challenge.mac_payload() {
        Ok(payload) => hmac_sha256_verify(secret, &payload, &challenge.mac).unwrap_or(false),
        Err(_) => false,
    }
}
