use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub type Record<V> = std::collections::HashMap<String, V>;

pub type AnyJson = serde_json::Value;

/// Protocol tag carried by every challenge and payment.
pub const ACE_PAYMENT_VERSION: &str = "ace-x402-v1";

/// The only asset this scheme settles in.
pub const CURRENCY: &str = "USDC";

/// Literal prefix of the payment signing message, before personal-sign framing.
pub const SIGNING_PREFIX: &str = "ACE_PAYMENT_V1\n";

pub const IDEMPOTENCY_KEY_PREFIX: &str = "aceid_";

pub const HEADER_PAYMENT_REQUIRED: &str = "payment-required";
pub const HEADER_PAYMENT_SIGNATURE: &str = "payment-signature";
pub const HEADER_PAYMENT_RESPONSE: &str = "payment-response";
pub const HEADER_X_PAYMENT: &str = "x-payment";
pub const HEADER_ACE_PAYMENT: &str = "x-ace-payment";
pub const HEADER_IDEMPOTENCY_KEY: &str = "x-ace-idempotency-key";

/// A base64-encoded UTF-8 JSON header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base64EncodedHeader(pub String);

/// Version of the x402 transport envelopes.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum X402Version {
    V2,
}

impl Serialize for X402Version {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            X402Version::V2 => serializer.serialize_u8(2),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = u8::deserialize(deserializer)?;
        match v {
            2 => Ok(X402Version::V2),
            _ => Err(serde::de::Error::custom(format!(
                "Unknown x402 version: {}",
                v
            ))),
        }
    }
}

/// 128 bits of randomness as lowercase hex, for challenge, nonce, and
/// session identifiers.
pub fn random_hex() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| Error::InvalidTimestamp(format!("{value}: {err}")))
}

pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
