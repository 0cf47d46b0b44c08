//! Wire envelopes of the payment flow and their base64 header codecs.

use base64::{Engine, prelude::BASE64_STANDARD};
use serde::{Deserialize, Serialize};

use crate::challenge::PaymentChallenge;
use crate::errors::Result;
use crate::payment::SignedPayment;
use crate::types::{ACE_PAYMENT_VERSION, AnyJson, Base64EncodedHeader, X402Version};

/// The `PAYMENT-REQUIRED` envelope of a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: X402Version,
    pub error: String,
    pub accepts: Vec<PaymentOffer>,
}

/// One way to pay, listed under `accepts` in the 402 envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOffer {
    pub scheme: String,
    pub network: String,
    /// Decimal string of micro-USDC.
    pub amount: String,
    pub asset: String,
    pub pay_to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<AnyJson>,
}

impl PaymentRequired {
    /// First challenge under `accepts[*].extra.challenge` whose version
    /// matches this protocol.
    pub fn find_challenge(&self) -> Option<PaymentChallenge> {
        self.accepts.iter().find_map(|offer| {
            let raw = offer.extra.as_ref()?.get("challenge")?;
            let challenge: PaymentChallenge = serde_json::from_value(raw.clone()).ok()?;
            (challenge.version == ACE_PAYMENT_VERSION).then_some(challenge)
        })
    }
}

/// The `PAYMENT-RESPONSE` settlement acknowledgment on a paid response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementAck {
    pub x402_version: X402Version,
    pub settled: bool,
    pub idempotency_key: String,
}

/// Body of a paid 200 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidBody {
    pub status: String,
    pub replayed: bool,
    pub result: AnyJson,
    pub payment: PaidReceipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidReceipt {
    pub idempotency_key: String,
    pub amount_microusdc: u64,
}

fn encode<T: Serialize>(value: &T) -> std::result::Result<Base64EncodedHeader, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(Base64EncodedHeader(BASE64_STANDARD.encode(json)))
}

fn decode<T: serde::de::DeserializeOwned>(header: &Base64EncodedHeader) -> Result<T> {
    let bytes = BASE64_STANDARD.decode(&header.0)?;
    let json = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&json)?)
}

impl TryFrom<&SignedPayment> for Base64EncodedHeader {
    type Error = serde_json::Error;

    fn try_from(value: &SignedPayment) -> std::result::Result<Self, Self::Error> {
        encode(value)
    }
}

impl TryFrom<&Base64EncodedHeader> for SignedPayment {
    type Error = crate::errors::Error;

    fn try_from(value: &Base64EncodedHeader) -> std::result::Result<Self, Self::Error> {
        decode(value)
    }
}

impl TryFrom<&PaymentRequired> for Base64EncodedHeader {
    type Error = serde_json::Error;

    fn try_from(value: &PaymentRequired) -> std::result::Result<Self, Self::Error> {
        encode(value)
    }
}

impl TryFrom<&Base64EncodedHeader> for PaymentRequired {
    type Error = crate::errors::Error;

    fn try_from(value: &Base64EncodedHeader) -> std::result::Result<Self, Self::Error> {
        decode(value)
    }
}

impl TryFrom<&SettlementAck> for Base64EncodedHeader {
    type Error = serde_json::Error;

    fn try_from(value: &SettlementAck) -> std::result::Result<Self, Self::Error> {
        encode(value)
    }
}

impl TryFrom<&Base64EncodedHeader> for SettlementAck {
    type Error = crate::errors::Error;

    fn try_from(value: &Base64EncodedHeader) -> std::result::Result<Self, Self::Error> {
        decode(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::challenge::create_challenge;
    use crate::payment::{
        IdempotencyInputs, UnsignedPayment, derive_challenge_hash, derive_idempotency_key,
        derive_request_hash,
    };
    use crate::types::CURRENCY;

    use super::*;

    fn challenge() -> PaymentChallenge {
        create_challenge()
            .secret("origin-secret")
            .resource("/compute?task=demo")
            .method("GET")
            .amount_microusdc(250_000)
            .issued_at("2026-08-02T12:00:00.000Z".to_string())
            .expires_at("2026-08-02T12:05:00.000Z".to_string())
            .call()
            .unwrap()
    }

    fn signed_payment() -> SignedPayment {
        let challenge = challenge();
        let request_hash = derive_request_hash("GET", "/compute?task=demo", None);
        SignedPayment {
            payload: UnsignedPayment {
                version: ACE_PAYMENT_VERSION.to_string(),
                session_id: "sess_1".to_string(),
                payer: "0xabcd000000000000000000000000000000000000".to_string(),
                challenge_id: challenge.challenge_id.clone(),
                idempotency_key: derive_idempotency_key(&IdempotencyInputs {
                    session_id: "sess_1",
                    payer: "0xabcd000000000000000000000000000000000000",
                    challenge_id: &challenge.challenge_id,
                    request_hash: &request_hash,
                    amount_microusdc: challenge.amount_microusdc,
                }),
                request_hash,
                challenge_hash: derive_challenge_hash(&challenge).unwrap(),
                challenge,
                amount_microusdc: 250_000,
                currency: CURRENCY.to_string(),
                session_expires_at: "2026-08-03T12:00:00.000Z".to_string(),
                issued_at: "2026-08-02T12:00:01.000Z".to_string(),
            },
            signature: format!("0x{}", "11".repeat(65)),
        }
    }

    #[test]
    fn payment_header_round_trips() {
        let payment = signed_payment();
        let header = Base64EncodedHeader::try_from(&payment).unwrap();
        let decoded = SignedPayment::try_from(&header).unwrap();
        assert_eq!(decoded, payment);
    }

    #[test]
    fn payment_required_round_trips() {
        let envelope = PaymentRequired {
            x402_version: X402Version::V2,
            error: "payment_required".to_string(),
            accepts: vec![PaymentOffer {
                scheme: "exact".to_string(),
                network: "base".to_string(),
                amount: "250000".to_string(),
                asset: "USDC".to_string(),
                pay_to: "0x0000000000000000000000000000000000000000".to_string(),
                extra: Some(json!({ "challenge": challenge() })),
            }],
        };
        let header = Base64EncodedHeader::try_from(&envelope).unwrap();
        let decoded = PaymentRequired::try_from(&header).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn settlement_ack_round_trips() {
        let ack = SettlementAck {
            x402_version: X402Version::V2,
            settled: true,
            idempotency_key: "aceid_00".to_string(),
        };
        let header = Base64EncodedHeader::try_from(&ack).unwrap();
        assert_eq!(SettlementAck::try_from(&header).unwrap(), ack);
    }

    #[test]
    fn find_challenge_skips_foreign_offers() {
        let mut foreign = challenge();
        foreign.version = "other-protocol-v9".to_string();
        let envelope = PaymentRequired {
            x402_version: X402Version::V2,
            error: "payment_required".to_string(),
            accepts: vec![
                PaymentOffer {
                    scheme: "exact".to_string(),
                    network: "base".to_string(),
                    amount: "1".to_string(),
                    asset: "USDC".to_string(),
                    pay_to: String::new(),
                    extra: None,
                },
                PaymentOffer {
                    scheme: "exact".to_string(),
                    network: "base".to_string(),
                    amount: "1".to_string(),
                    asset: "USDC".to_string(),
                    pay_to: String::new(),
                    extra: Some(json!({ "challenge": foreign })),
                },
                PaymentOffer {
                    scheme: "exact".to_string(),
                    network: "base".to_string(),
                    amount: "250000".to_string(),
                    asset: "USDC".to_string(),
                    pay_to: String::new(),
                    extra: Some(json!({ "challenge": challenge() })),
                },
            ],
        };
        let found = envelope.find_challenge().unwrap();
        assert_eq!(found.version, ACE_PAYMENT_VERSION);
        assert_eq!(found.amount_microusdc, 250_000);
    }

    #[test]
    fn find_challenge_handles_empty_envelopes() {
        let envelope = PaymentRequired {
            x402_version: X402Version::V2,
            error: "payment_required".to_string(),
            accepts: Vec::new(),
        };
        assert!(envelope.find_challenge().is_none());
    }

    #[test]
    fn garbage_headers_fail_to_decode() {
        let header = Base64EncodedHeader("not base64!!".to_string());
        assert!(SignedPayment::try_from(&header).is_err());

        let header = Base64EncodedHeader(BASE64_STANDARD.encode("{\"not\": \"a payment\"}"));
        assert!(SignedPayment::try_from(&header).is_err());
    }
}
