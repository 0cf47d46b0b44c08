//! Axum wiring for the origin: the protected compute endpoint, the paid
//! response headers, and the listener.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde_json::json;

use ace_core::types::{
    AnyJson, HEADER_IDEMPOTENCY_KEY, HEADER_PAYMENT_RESPONSE, HEADER_PAYMENT_SIGNATURE,
    format_rfc3339, random_hex,
};

use crate::errors::ErrorResponse;
use crate::origin::{Origin, PaidResponse};

pub fn router(origin: Arc<Origin>) -> Router {
    Router::new()
        .route("/compute", any(compute_handler))
        .fallback(not_found)
        .with_state(origin)
}

/// Bind the configured port and serve the origin router.
pub async fn serve(origin: Arc<Origin>) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], origin.config().port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "origin listening");
    axum::serve(listener, router(origin)).await
}

async fn compute_handler(
    State(origin): State<Arc<Origin>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let resource = resource_of(&uri);
    let body = (!body.is_empty()).then_some(body);
    match origin
        .handle(&method, &resource, &headers, body.as_deref(), || {
            run_compute(&resource)
        })
        .await
    {
        Ok(paid) => paid_response(paid),
        Err(err) => err.into_response(),
    }
}

/// The demo compute workload behind the paywall.
fn run_compute(resource: &str) -> AnyJson {
    json!({
        "computeId": format!("cmp_{}", random_hex()),
        "resource": resource,
        "completedAt": format_rfc3339(Utc::now()),
    })
}

fn resource_of(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

fn paid_response(paid: PaidResponse) -> Response {
    let mut response = Json(&paid.body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&paid.payment_signature) {
        headers.insert(HeaderName::from_static(HEADER_PAYMENT_SIGNATURE), value);
    }
    if let Ok(value) = HeaderValue::from_str(&paid.settlement.0) {
        headers.insert(HeaderName::from_static(HEADER_PAYMENT_RESPONSE), value);
    }
    if let Ok(value) = HeaderValue::from_str(&paid.idempotency_key) {
        headers.insert(HeaderName::from_static(HEADER_IDEMPOTENCY_KEY), value);
    }
    response
}

async fn not_found() -> Response {
    ErrorResponse::not_found().into_response()
}
