//! Inbound side: webhook verification and the single-shot response channel.
//!
//! The crate does not listen on a socket. A host HTTP server passes each
//! webhook request to [`Creator::handle_webhook`] and writes back the
//! [`TransportResponse`]; a gateway client passes `INTERACTION_CREATE`
//! payloads to [`Creator::handle_gateway_interaction`], which posts the
//! initial response to the interaction callback endpoint instead.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ring::signature::{UnparsedPublicKey, ED25519};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::CreatorOptions;
use crate::creator::Creator;
use crate::error::{CreatorError, RestError};
use crate::types::{FileContent, Interaction, InteractionResponse};
use crate::util;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// What the host should send back for one webhook request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Uploads for the initial message; the host sends them as multipart.
    pub files: Vec<FileContent>,
}

impl TransportResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
            files: Vec::new(),
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            body: Some(Value::String(text.into())),
            ..Self::status(status)
        }
    }

    pub fn interaction(response: &InteractionResponse, files: Vec<FileContent>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_value(response).ok(),
            files,
        }
    }

    /// The body as an interaction response, for 200 replies.
    pub fn interaction_response(&self) -> Option<InteractionResponse> {
        self.body
            .clone()
            .and_then(|body| serde_json::from_value(body).ok())
    }
}

/// A response handed over by a context, plus the acknowledgement the
/// context waits for.
#[derive(Debug)]
pub struct Delivery {
    pub response: TransportResponse,
    ack: oneshot::Sender<Result<(), RestError>>,
}

impl Delivery {
    /// Take the response and release the waiting context immediately.
    pub fn into_response(self) -> TransportResponse {
        let _ = self.ack.send(Ok(()));
        self.response
    }

    /// Take the response and release the context later, once the outcome
    /// of delivering it is known.
    pub fn into_parts(self) -> (TransportResponse, DeliveryAck) {
        (self.response, DeliveryAck(self.ack))
    }
}

#[derive(Debug)]
pub struct DeliveryAck(oneshot::Sender<Result<(), RestError>>);

impl DeliveryAck {
    /// Report the delivery outcome. A failure hands the slot back to the
    /// context, which may try again.
    pub fn done(self, result: Result<(), RestError>) {
        let _ = self.0.send(result);
    }
}

/// Receiving half of a [`Responder`].
pub type Deliveries = mpsc::Receiver<Delivery>;

/// The one-time initial response slot of an interaction.
pub struct Responder {
    tx: Mutex<Option<mpsc::Sender<Delivery>>>,
}

impl Responder {
    pub fn channel() -> (Self, Deliveries) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<Delivery>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `response` to the transport and wait until it was delivered.
    ///
    /// Returns `Ok(false)` if the slot was used or the receiver went away.
    /// A failed delivery returns the error and keeps the slot open.
    pub async fn send(&self, response: TransportResponse) -> Result<bool, RestError> {
        let Some(tx) = self.slot().take() else {
            return Ok(false);
        };
        let (ack, acked) = oneshot::channel();
        if tx.send(Delivery { response, ack }).await.is_err() {
            return Ok(false);
        }
        match acked.await {
            Ok(Err(err)) => {
                *self.slot() = Some(tx);
                Err(err)
            }
            // A dropped ack still means the response left our hands.
            Ok(Ok(())) | Err(_) => Ok(true),
        }
    }

    pub fn is_used(&self) -> bool {
        self.slot().is_none()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").field("used", &self.is_used()).finish()
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Checks the `X-Signature-Ed25519` header of a webhook request.
pub trait SignatureVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, timestamp: &str, body: &[u8], signature: &str) -> bool;
}

/// Ed25519 over `timestamp || body`, with the application's public key.
#[derive(Clone)]
pub struct Ed25519Verifier {
    key: Vec<u8>,
}

impl Ed25519Verifier {
    pub fn from_hex(public_key: &str) -> Result<Self, CreatorError> {
        let key = hex::decode(public_key.trim())
            .map_err(|err| CreatorError::InvalidPublicKey(err.to_string()))?;
        if key.len() != 32 {
            return Err(CreatorError::InvalidPublicKey(format!(
                "expected 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { key })
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, timestamp: &str, body: &[u8], signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        UnparsedPublicKey::new(&ED25519, &self.key)
            .verify(&message, &signature)
            .is_ok()
    }
}

impl fmt::Debug for Ed25519Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Verifier({})", hex::encode(&self.key))
    }
}

fn header<'a, K, V>(headers: &'a [(K, V)], name: &str) -> Option<&'a str>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    headers
        .iter()
        .find(|(key, _)| key.as_ref().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_ref())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl Creator {
    /// Verify and dispatch one webhook request.
    ///
    /// Resolves when the interaction's initial response is known: 401 for a
    /// bad or stale signature, 400 for an unusable body, 500 if the
    /// handler finished without responding.
    pub async fn handle_webhook<K, V>(&self, headers: &[(K, V)], body: &[u8]) -> TransportResponse
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Some(verifier) = self.verifier() else {
            self.events()
                .error("received a webhook but no public key is configured");
            return TransportResponse::text(401, "Invalid signature");
        };
        let (Some(signature), Some(timestamp)) =
            (header(headers, SIGNATURE_HEADER), header(headers, TIMESTAMP_HEADER))
        else {
            return TransportResponse::text(401, "Invalid signature");
        };
        if !self.timestamp_in_window(timestamp) {
            debug!(timestamp, "rejected webhook with stale signature timestamp");
            return TransportResponse::text(401, "Invalid signature");
        }
        if !verifier.verify(timestamp, body, signature) {
            return TransportResponse::text(401, "Invalid signature");
        }

        let interaction: Interaction = match serde_json::from_slice(body) {
            Ok(interaction) => interaction,
            Err(err) => {
                self.events().debug(format!("unparseable interaction body: {}", err));
                return TransportResponse::status(400);
            }
        };

        let (responder, mut deliveries) = Responder::channel();
        let creator = self.clone();
        tokio::spawn(async move { creator.handle_interaction(interaction, responder).await });
        match deliveries.recv().await {
            Some(delivery) => delivery.into_response(),
            None => {
                warn!("interaction handler finished without responding");
                self.events()
                    .warn("interaction handler finished without responding");
                TransportResponse::status(500)
            }
        }
    }

    fn timestamp_in_window(&self, timestamp: &str) -> bool {
        let Ok(seconds) = timestamp.parse::<u64>() else {
            return false;
        };
        let now_ms = util::now_unix_ms();
        let age_ms = now_ms.abs_diff(seconds.saturating_mul(1000));
        u128::from(age_ms) <= self.options().max_signature_timestamp.as_millis()
    }

    /// Dispatch an interaction received over the gateway. The initial
    /// response is posted to the callback endpoint; the context waits for
    /// that post and gets its error if Discord rejects it.
    pub async fn handle_gateway_interaction(&self, interaction: Interaction) {
        let (responder, mut deliveries) = Responder::channel();
        let creator = self.clone();
        let interaction_id = interaction.id.clone();
        let token = interaction.token.clone();
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                let (response, ack) = delivery.into_parts();
                let Some(callback) = response.interaction_response() else {
                    creator.events().debug(format!(
                        "gateway interaction {} answered with status {}",
                        interaction_id, response.status
                    ));
                    ack.done(Ok(()));
                    break;
                };
                let result = creator
                    .rest()
                    .create_interaction_response(&interaction_id, &token, &callback, response.files)
                    .await;
                let delivered = result.is_ok();
                if let Err(err) = &result {
                    creator
                        .events()
                        .warn(format!("interaction callback failed: {}", err));
                }
                ack.done(result);
                if delivered {
                    break;
                }
            }
        });
        self.handle_interaction(interaction, responder).await;
    }

    /// Verifier from an explicit override or the configured public key.
    pub(crate) fn build_verifier(options: &CreatorOptions) -> Option<Arc<dyn SignatureVerifier>> {
        let key = options.require_public_key().ok()?;
        match Ed25519Verifier::from_hex(key) {
            Ok(verifier) => Some(Arc::new(verifier)),
            Err(err) => {
                warn!(%err, "ignoring configured public key");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreatorOptions;
    use crate::rest::testing::MockTransport;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use serde_json::json;

    struct Signer(Ed25519KeyPair);

    impl Signer {
        fn new() -> Self {
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
            Self(Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap())
        }

        fn public_hex(&self) -> String {
            hex::encode(self.0.public_key().as_ref())
        }

        fn headers(&self, timestamp: &str, body: &[u8]) -> Vec<(String, String)> {
            let mut message = timestamp.as_bytes().to_vec();
            message.extend_from_slice(body);
            vec![
                ("X-Signature-Ed25519".to_string(), hex::encode(self.0.sign(&message).as_ref())),
                ("X-Signature-Timestamp".to_string(), timestamp.to_string()),
            ]
        }
    }

    fn now_secs() -> String {
        (util::now_unix_ms() / 1000).to_string()
    }

    fn creator(signer: &Signer) -> (Creator, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let creator = Creator::with_transport(
            CreatorOptions::new("1").public_key(signer.public_hex()),
            transport.clone(),
        );
        (creator, transport)
    }

    #[test]
    fn verifier_accepts_its_own_signatures() {
        let signer = Signer::new();
        let verifier = Ed25519Verifier::from_hex(&signer.public_hex()).unwrap();
        let headers = signer.headers("123", b"{}");
        assert!(verifier.verify("123", b"{}", &headers[0].1));
        assert!(!verifier.verify("124", b"{}", &headers[0].1));
        assert!(!verifier.verify("123", b"{} ", &headers[0].1));
        assert!(!verifier.verify("123", b"{}", "not hex"));
    }

    #[test]
    fn bad_public_keys_are_rejected() {
        assert!(matches!(
            Ed25519Verifier::from_hex("zz"),
            Err(CreatorError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            Ed25519Verifier::from_hex("abcd"),
            Err(CreatorError::InvalidPublicKey(_))
        ));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let signer = Signer::new();
        let (creator, transport) = creator(&signer);
        let body = br#"{"id":"1","application_id":"1","type":1,"token":"t","version":1}"#;
        let headers = signer.headers(&now_secs(), body);

        let response = creator.handle_webhook(&headers, body).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Some(json!({"type": 1})));
        assert!(transport.requests().is_empty());
        assert_eq!(creator.rest().bucket_count(), 0);
    }

    #[tokio::test]
    async fn invalid_signature_is_401() {
        let signer = Signer::new();
        let (creator, _) = creator(&signer);
        let body = br#"{"id":"1","application_id":"1","type":1,"token":"t"}"#;
        let mut headers = signer.headers(&now_secs(), body);
        headers[0].1 = "00".repeat(64);

        let response = creator.handle_webhook(&headers, body).await;
        assert_eq!(response, TransportResponse::text(401, "Invalid signature"));
    }

    #[tokio::test]
    async fn stale_timestamp_is_401() {
        let signer = Signer::new();
        let (creator, _) = creator(&signer);
        let body = br#"{"id":"1","application_id":"1","type":1,"token":"t"}"#;
        let stale = (util::now_unix_ms() / 1000 - 60).to_string();
        let headers = signer.headers(&stale, body);
        assert_eq!(creator.handle_webhook(&headers, body).await.status, 401);
    }

    #[tokio::test]
    async fn wider_timestamp_window_accepts_older_requests() {
        let signer = Signer::new();
        let transport = MockTransport::new();
        let creator = Creator::with_transport(
            CreatorOptions::new("1")
                .public_key(signer.public_hex())
                .max_signature_timestamp(std::time::Duration::from_secs(120)),
            transport,
        );
        let body = br#"{"id":"1","application_id":"1","type":1,"token":"t"}"#;
        let older = (util::now_unix_ms() / 1000 - 60).to_string();
        let headers = signer.headers(&older, body);
        assert_eq!(creator.handle_webhook(&headers, body).await.status, 200);
    }

    #[tokio::test]
    async fn missing_headers_are_401() {
        let signer = Signer::new();
        let (creator, _) = creator(&signer);
        let headers: Vec<(&str, &str)> = Vec::new();
        assert_eq!(creator.handle_webhook(&headers, b"{}").await.status, 401);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let signer = Signer::new();
        let (creator, _) = creator(&signer);
        let body = b"not json";
        let headers = signer.headers(&now_secs(), body);
        assert_eq!(creator.handle_webhook(&headers, body).await.status, 400);
    }

    #[tokio::test]
    async fn responder_is_single_shot() {
        let (responder, mut rx) = Responder::channel();
        let waiter = tokio::spawn(async move { rx.recv().await.unwrap().into_response() });
        assert!(responder.send(TransportResponse::status(204)).await.unwrap());
        assert!(responder.is_used());
        assert!(!responder.send(TransportResponse::status(200)).await.unwrap());
        assert_eq!(waiter.await.unwrap().status, 204);
    }

    #[tokio::test]
    async fn failed_delivery_reopens_the_slot() {
        let (responder, mut rx) = Responder::channel();
        let transport = tokio::spawn(async move {
            let (_, ack) = rx.recv().await.unwrap().into_parts();
            ack.done(Err(RestError::Transport {
                method: crate::rest::HttpMethod::Post,
                path: "/interactions/1/t/callback".to_string(),
                message: "connection reset".to_string(),
                stack: crate::error::CapturedStack::capture(),
            }));
            rx.recv().await.unwrap().into_response()
        });

        let err = responder.send(TransportResponse::status(204)).await.unwrap_err();
        assert!(matches!(err, RestError::Transport { .. }));
        assert!(!responder.is_used());
        assert!(responder.send(TransportResponse::status(200)).await.unwrap());
        assert_eq!(transport.await.unwrap().status, 200);
    }
}
