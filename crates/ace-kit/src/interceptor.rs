//! The payment interceptor: a wrapper around an HTTP fetch primitive that
//! detects `402 Payment Required`, signs the challenge through the session
//! ledger, retries, and commits or releases the attempt on the outcome.

use http::{Method, StatusCode};
use url::Url;

use ace_core::challenge::PaymentChallenge;
use ace_core::payment::SignedPayment;
use ace_core::transport::PaymentRequired;
use ace_core::types::{
    ACE_PAYMENT_VERSION, AnyJson, Base64EncodedHeader, HEADER_ACE_PAYMENT,
    HEADER_IDEMPOTENCY_KEY, HEADER_PAYMENT_REQUIRED, HEADER_PAYMENT_SIGNATURE, HEADER_X_PAYMENT,
    Record,
};

use crate::errors::{InterceptError, SessionError};
use crate::session::{PaymentSession, RequestContext};
use crate::signer::PaymentSigner;
use crate::store::SessionStore;

/// An outbound HTTP request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: Method,
    pub url: Url,
    pub headers: Record<String>,
    pub body: Option<String>,
}

/// The transport's view of a response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: Record<String>,
    pub body: String,
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Record<String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// The HTTP fetch primitive the interceptor wraps.
pub trait PaymentTransport {
    type Error: std::error::Error + Send + Sync + 'static;

    fn call(&self, request: &HttpCall) -> impl Future<Output = Result<HttpReply, Self::Error>>;
}

/// Wraps a transport with 402 challenge handling for one session.
pub struct PaymentInterceptor<W, S, T> {
    session: PaymentSession<W, S>,
    transport: T,
}

impl<W, S, T> PaymentInterceptor<W, S, T>
where
    W: PaymentSigner,
    S: SessionStore,
    T: PaymentTransport,
{
    pub fn new(session: PaymentSession<W, S>, transport: T) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &PaymentSession<W, S> {
        &self.session
    }

    pub fn into_session(self) -> PaymentSession<W, S> {
        self.session
    }

    /// Issue `request`, transparently paying one challenge when the origin
    /// answers 402. Non-402 responses pass through unchanged, as do 402s
    /// the interceptor cannot or must not pay.
    pub async fn send(
        &mut self,
        request: HttpCall,
    ) -> Result<HttpReply, InterceptError<T::Error>> {
        let reply = self
            .transport
            .call(&request)
            .await
            .map_err(InterceptError::Transport)?;
        if reply.status != StatusCode::PAYMENT_REQUIRED {
            return Ok(reply);
        }

        // Never stack a second payment onto a request that carried one.
        if [
            HEADER_PAYMENT_SIGNATURE,
            HEADER_X_PAYMENT,
            HEADER_ACE_PAYMENT,
        ]
        .iter()
        .any(|name| header(&request.headers, name).is_some())
        {
            tracing::debug!("request already carried a payment header, passing 402 through");
            return Ok(reply);
        }

        let Some(challenge) = extract_challenge(&reply) else {
            tracing::debug!("402 without a usable challenge, passing through");
            return Ok(reply);
        };
        tracing::debug!(
            challenge_id = %challenge.challenge_id,
            amount = challenge.amount_microusdc,
            "paying challenge"
        );

        let context = RequestContext {
            method: request.method.as_str().to_string(),
            url: request.url.clone(),
            body: request.body.clone(),
        };
        let signed = self.session.sign_for_challenge(&challenge, &context).await?;
        let idempotency_key = signed.payload.idempotency_key.clone();

        let encoded = Base64EncodedHeader::try_from(&signed)
            .map_err(|err| InterceptError::Session(SessionError::Codec(err.into())))?;
        let mut retry = request;
        retry
            .headers
            .insert("PAYMENT-SIGNATURE".to_string(), encoded.0);
        retry
            .headers
            .insert(HEADER_IDEMPOTENCY_KEY.to_string(), idempotency_key.clone());

        let paid = match self.transport.call(&retry).await {
            Ok(paid) => paid,
            Err(err) => {
                self.session.release_payment(&idempotency_key).await?;
                return Err(InterceptError::Transport(err));
            }
        };

        if paid.status.is_success() {
            let commit_key =
                echoed_idempotency_key(&paid).unwrap_or_else(|| idempotency_key.clone());
            if commit_key != idempotency_key {
                tracing::warn!(
                    ours = %idempotency_key,
                    echoed = %commit_key,
                    "origin echoed a different idempotency key; committing the echoed attempt"
                );
            }
            self.session.commit_payment(&commit_key).await?;
            Ok(paid)
        } else {
            tracing::debug!(status = %paid.status, "paid retry failed, releasing attempt");
            self.session.release_payment(&idempotency_key).await?;
            Ok(paid)
        }
    }
}

/// Challenge extraction: the `PAYMENT-REQUIRED` header wins; a JSON body
/// `challenge` is the fallback when the header is absent or undecodable.
fn extract_challenge(reply: &HttpReply) -> Option<PaymentChallenge> {
    match header(&reply.headers, HEADER_PAYMENT_REQUIRED)
        .map(|raw| PaymentRequired::try_from(&Base64EncodedHeader(raw.to_string())))
    {
        Some(Ok(envelope)) => envelope.find_challenge(),
        _ => challenge_from_body(reply),
    }
}

fn challenge_from_body(reply: &HttpReply) -> Option<PaymentChallenge> {
    let content_type = header(&reply.headers, "content-type")?;
    if !content_type.to_ascii_lowercase().contains("json") {
        return None;
    }
    let body: AnyJson = serde_json::from_str(&reply.body).ok()?;
    let challenge: PaymentChallenge =
        serde_json::from_value(body.get("challenge")?.clone()).ok()?;
    (challenge.version == ACE_PAYMENT_VERSION).then_some(challenge)
}

fn echoed_idempotency_key(reply: &HttpReply) -> Option<String> {
    let raw = header(&reply.headers, HEADER_PAYMENT_SIGNATURE)?;
    let echoed = SignedPayment::try_from(&Base64EncodedHeader(raw.to_string())).ok()?;
    Some(echoed.payload.idempotency_key)
}
