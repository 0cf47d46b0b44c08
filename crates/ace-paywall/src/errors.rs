use std::fmt::Display;

use axum::response::IntoResponse;
use http::{HeaderName, HeaderValue, StatusCode};
use serde_json::json;

use ace_core::challenge::PaymentChallenge;
use ace_core::transport::PaymentRequired;
use ace_core::types::{AnyJson, Base64EncodedHeader, HEADER_PAYMENT_REQUIRED};

/// An error reply from the origin, with an optional payment header.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub header: Option<(HeaderName, Base64EncodedHeader)>,
    pub body: AnyJson,
}

impl ErrorResponse {
    /// The 402 reply: `PAYMENT-REQUIRED` header plus a JSON challenge body
    /// for clients that cannot read headers.
    pub fn payment_required(envelope: &PaymentRequired, challenge: &PaymentChallenge) -> Self {
        let header = Base64EncodedHeader::try_from(envelope)
            .ok()
            .map(|value| (HeaderName::from_static(HEADER_PAYMENT_REQUIRED), value));
        ErrorResponse {
            status: StatusCode::PAYMENT_REQUIRED,
            header,
            body: json!({ "error": "payment_required", "challenge": challenge }),
        }
    }

    pub fn invalid_payment(message: impl Display) -> Self {
        ErrorResponse {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            header: None,
            body: json!({ "error": "invalid_payment", "message": message.to_string() }),
        }
    }

    pub fn conflict(idempotency_key: &str) -> Self {
        ErrorResponse {
            status: StatusCode::CONFLICT,
            header: None,
            body: json!({
                "error": "idempotency_key_conflict",
                "idempotencyKey": idempotency_key,
            }),
        }
    }

    pub fn not_found() -> Self {
        ErrorResponse {
            status: StatusCode::NOT_FOUND,
            header: None,
            body: json!({ "error": "not_found" }),
        }
    }

    pub fn server_error(message: impl Display) -> Self {
        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            header: None,
            body: json!({ "error": "internal_error", "message": message.to_string() }),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status, axum::Json(self.body)).into_response();
        if let Some((name, Base64EncodedHeader(value))) = self.header {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
