//! The single entry point for outbound REST calls.
//!
//! [`RequestHandler`] owns every bucket, the learned route hashes and the
//! global rate-limit gate. Cheap to clone (internals are behind `Arc`).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RestOptions;
use crate::error::RestError;
use crate::events::EventBus;
use crate::rest::bucket::SequentialBucket;
use crate::rest::request::{HttpMethod, Request, RequestOptions};
use crate::rest::transport::Transport;

type GlobalTimeout = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone)]
struct HashEntry {
    hash: String,
    last_access: Instant,
}

struct GlobalState {
    blocked: bool,
    reset: Instant,
    /// One timer shared by every bucket waiting on the global limit.
    timeout: Option<GlobalTimeout>,
}

pub(crate) struct HandlerInner {
    pub(crate) options: RestOptions,
    pub(crate) authorization: Option<String>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventBus,
    hashes: Mutex<HashMap<String, HashEntry>>,
    buckets: Mutex<HashMap<String, Arc<SequentialBucket>>>,
    global: Mutex<GlobalState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HandlerInner {
    /// The shared global timer, if the handler is globally blocked right now.
    pub(crate) fn global_timeout(&self) -> Option<GlobalTimeout> {
        let mut global = lock(&self.global);
        if global.blocked && Instant::now() < global.reset {
            let reset = global.reset;
            let timeout = global
                .timeout
                .get_or_insert_with(|| tokio::time::sleep_until(reset).boxed().shared());
            return Some(timeout.clone());
        }
        global.blocked = false;
        global.timeout = None;
        None
    }

    pub(crate) fn set_global_timeout(&self, retry_after: Duration) {
        let reset = Instant::now() + retry_after + self.options.ratelimiter_offset;
        let mut global = lock(&self.global);
        global.blocked = true;
        global.reset = reset;
        global.timeout = Some(tokio::time::sleep_until(reset).boxed().shared());
        warn!(retry_after_ms = retry_after.as_millis() as u64, "global rate limit hit");
    }

    pub(crate) fn learn_hash(&self, request_id: &str, hash: &str, current: &str) {
        let mut hashes = lock(&self.hashes);
        let now = Instant::now();
        if hash != current {
            debug!(request = request_id, from = current, to = hash, "learned bucket hash");
            hashes.insert(
                request_id.to_string(),
                HashEntry {
                    hash: hash.to_string(),
                    last_access: now,
                },
            );
        } else if let Some(entry) = hashes.get_mut(request_id) {
            entry.last_access = now;
        }
    }

    fn limited(&self) -> bool {
        let global = lock(&self.global);
        global.blocked && Instant::now() < global.reset
    }
}

// ---------------------------------------------------------------------------
// RequestHandler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RequestHandler {
    inner: Arc<HandlerInner>,
}

impl RequestHandler {
    /// `token` is used as-is for the `Authorization` header of
    /// authenticated requests.
    pub fn new(options: RestOptions, authorization: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_events(options, authorization, transport, EventBus::new())
    }

    pub(crate) fn with_events(
        options: RestOptions,
        authorization: Option<String>,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                options,
                authorization,
                transport,
                events,
                hashes: Mutex::new(HashMap::new()),
                buckets: Mutex::new(HashMap::new()),
                global: Mutex::new(GlobalState {
                    blocked: false,
                    reset: Instant::now(),
                    timeout: None,
                }),
            }),
        }
    }

    pub fn options(&self) -> &RestOptions {
        &self.inner.options
    }

    /// Globally rate-limited right now.
    pub fn limited(&self) -> bool {
        self.inner.limited()
    }

    /// Make a call. Resolves with the response JSON, or `Value::Null` for
    /// empty and non-JSON bodies.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: impl Into<String>,
        options: RequestOptions,
    ) -> Result<Value, RestError> {
        let request = Request::new(method, path, options);
        let bucket = self.bucket_for(&request);
        bucket.add(&self.inner, request).await
    }

    /// [`request`](Self::request), deserializing the response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: impl Into<String>,
        options: RequestOptions,
    ) -> Result<T, RestError> {
        let value = self.request(method, path, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn bucket_for(&self, request: &Request) -> Arc<SequentialBucket> {
        let request_id = request.request_id();
        let hash = {
            let mut hashes = lock(&self.inner.hashes);
            match hashes.get_mut(&request_id) {
                Some(entry) => {
                    entry.last_access = Instant::now();
                    entry.hash.clone()
                }
                None => request_id.clone(),
            }
        };

        let bucket_id = format!("{}:{}", hash, request.major_parameter());
        let mut buckets = lock(&self.inner.buckets);
        if let Some(bucket) = buckets.get(&bucket_id) {
            return bucket.clone();
        }
        debug!(bucket = %bucket_id, "created bucket");
        let bucket = Arc::new(SequentialBucket::new(hash, request.major_parameter()));
        buckets.insert(bucket_id, bucket.clone());
        bucket
    }

    /// Bucket by `hash:majorParameter` id.
    pub fn bucket(&self, id: &str) -> Option<Arc<SequentialBucket>> {
        lock(&self.inner.buckets).get(id).cloned()
    }

    pub fn bucket_count(&self) -> usize {
        lock(&self.inner.buckets).len()
    }

    /// The hash Discord assigned to `request_id` (`METHOD:route`), if learned.
    pub fn learned_hash(&self, request_id: &str) -> Option<String> {
        lock(&self.inner.hashes).get(request_id).map(|e| e.hash.clone())
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("base_url", &self.inner.options.base_url)
            .field("authorization", &self.inner.authorization.as_ref().map(|_| "<redacted>"))
            .field("buckets", &self.bucket_count())
            .field("limited", &self.limited())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::testing::{MockReply, MockTransport};
    use crate::rest::RawResponse;
    use serde_json::json;

    const CHANNEL: &str = "1100000000000000001";

    fn handler(transport: &Arc<MockTransport>) -> RequestHandler {
        RequestHandler::new(RestOptions::default(), Some("Bot token".into()), transport.clone())
    }

    fn limited_response(remaining: u32, reset_after: f64) -> RawResponse {
        RawResponse::new(200)
            .with_json(&json!({"ok": true}))
            .with_header("x-ratelimit-limit", "5")
            .with_header("x-ratelimit-remaining", remaining.to_string())
            .with_header("x-ratelimit-reset-after", reset_after.to_string())
    }

    static_assertions::assert_impl_all!(RequestHandler: Send, Sync, Clone);

    // -- request() --

    #[tokio::test(start_paused = true)]
    async fn resolves_json_body_and_sends_auth() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, json!({"id": "42"})));
        let rest = handler(&transport);

        let value = rest
            .request(HttpMethod::Get, format!("/channels/{}", CHANNEL), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, json!({"id": "42"}));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("authorization"), Some("Bot token"));
        assert_eq!(rest.bucket_count(), 1);
        assert!(rest.bucket(&format!("GET:/channels/:id:{}", CHANNEL)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn non_json_success_resolves_null() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(RawResponse::new(204)));
        let value = handler(&transport)
            .request(HttpMethod::Delete, "/channels/1/pins/2", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status_resolves_null() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(RawResponse::new(304)));
        let value = handler(&transport)
            .request(HttpMethod::Get, "/gateway", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_structured() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(404, json!({"code": 10008, "message": "Unknown Message"})));
        let err = handler(&transport)
            .request(HttpMethod::Get, "/channels/1/messages/2", RequestOptions::new())
            .await
            .unwrap_err();
        match err {
            RestError::Http(e) => {
                assert_eq!(e.status, 404);
                assert_eq!(e.code, Some(10008));
                assert_eq!(e.message, "Unknown Message");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(transport.requests().len(), 1);
    }

    // -- FIFO --

    #[tokio::test(start_paused = true)]
    async fn same_bucket_requests_are_sequential_and_ordered() {
        let transport = MockTransport::new();
        transport.set_latency(Duration::from_millis(20));
        for _ in 0..5 {
            transport.push(MockReply::Response(limited_response(4, 0.0)));
        }
        let rest = handler(&transport);

        let mut tasks = Vec::new();
        for i in 0..5 {
            let rest = rest.clone();
            tasks.push(tokio::spawn(async move {
                rest.request(
                    HttpMethod::Post,
                    format!("/channels/{}/messages", CHANNEL),
                    RequestOptions::new().body(json!({"n": i})),
                )
                .await
            }));
            tokio::task::yield_now().await;
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let order: Vec<_> = transport
            .requests()
            .iter()
            .map(|r| serde_json::from_slice::<Value>(r.body.as_ref().unwrap()).unwrap()["n"].clone())
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_major_parameters_use_different_buckets() {
        let transport = MockTransport::new();
        let rest = handler(&transport);
        rest.request(HttpMethod::Get, "/channels/1100000000000000001", RequestOptions::new())
            .await
            .unwrap();
        rest.request(HttpMethod::Get, "/channels/1100000000000000002", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(rest.bucket_count(), 2);
    }

    // -- token accounting --

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_reset() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(limited_response(0, 2.0)));
        transport.push(MockReply::Response(limited_response(4, 2.0)));
        let rest = handler(&transport);
        let path = format!("/channels/{}/messages", CHANNEL);

        let start = Instant::now();
        rest.request(HttpMethod::Get, path.clone(), RequestOptions::new()).await.unwrap();
        let bucket = rest.bucket(&format!("GET:/channels/:id/messages:{}", CHANNEL)).unwrap();
        assert!(bucket.limited());
        assert_eq!(bucket.remaining(), 0);

        rest.request(HttpMethod::Get, path, RequestOptions::new()).await.unwrap();
        let times = transport.sent_at();
        let offset = RestOptions::default().ratelimiter_offset;
        assert!(times[1] - start >= Duration::from_secs(2) + offset);
        assert_eq!(bucket.limit(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_to_limit_after_reset() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(limited_response(0, 1.0)));
        let rest = handler(&transport);
        rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap();
        let bucket = rest.bucket("GET:/gateway:global").unwrap();
        assert_eq!(bucket.remaining(), 0);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(bucket.remaining(), 5);
    }

    // -- hashes --

    #[tokio::test(start_paused = true)]
    async fn learned_hash_moves_later_requests_to_a_new_bucket() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(
            RawResponse::new(200).with_header("x-ratelimit-bucket", "abc123"),
        ));
        let rest = handler(&transport);
        let path = format!("/channels/{}/messages", CHANNEL);

        rest.request(HttpMethod::Get, path.clone(), RequestOptions::new()).await.unwrap();
        assert_eq!(rest.learned_hash("GET:/channels/:id/messages").as_deref(), Some("abc123"));

        rest.request(HttpMethod::Get, path, RequestOptions::new()).await.unwrap();
        assert!(rest.bucket(&format!("abc123:{}", CHANNEL)).is_some());
        assert_eq!(rest.bucket_count(), 2);
    }

    // -- 429 / global --

    #[tokio::test(start_paused = true)]
    async fn rate_limited_request_is_retried_transparently() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(429, json!({"message": "You are being rate limited.", "retry_after": 1.5, "global": false})));
        transport.push(MockReply::json(200, json!({"ok": 1})));
        let rest = RequestHandler::new(
            RestOptions {
                retry_limit: 0,
                ..RestOptions::default()
            },
            None,
            transport.clone(),
        );

        let start = Instant::now();
        let value = rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap();
        assert_eq!(value, json!({"ok": 1}));
        let times = transport.sent_at();
        assert_eq!(times.len(), 2);
        assert!(times[1] - start >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_blocks_every_bucket() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(
            RawResponse::new(429)
                .with_json(&json!({"message": "global", "retry_after": 3.0, "global": true}))
                .with_header("x-ratelimit-global", "true"),
        ));
        let rest = handler(&transport);

        let first = {
            let rest = rest.clone();
            tokio::spawn(async move { rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await })
        };
        while transport.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(rest.limited());

        // A fresh bucket with a token to spare still waits for the global reset.
        let start = Instant::now();
        rest.request(HttpMethod::Get, format!("/channels/{}", CHANNEL), RequestOptions::new())
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        let times = transport.sent_at();
        assert_eq!(times.len(), 3);
        assert!(times[1] - start >= Duration::from_millis(2900));
        assert!(times[2] - start >= Duration::from_millis(2900));
        assert!(!rest.limited());
    }

    // -- retries --

    #[tokio::test(start_paused = true)]
    async fn server_errors_retry_until_the_limit() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push(MockReply::json(502, json!({"message": "Bad Gateway"})));
        }
        let rest = RequestHandler::new(
            RestOptions {
                retry_limit: 2,
                ..RestOptions::default()
            },
            None,
            transport.clone(),
        );
        let err = rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_then_success_resolves() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(500, json!({})));
        transport.push(MockReply::json(200, json!({"ok": true})));
        let value = handler(&transport)
            .request(HttpMethod::Get, "/gateway", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_become_transport_error_after_retries() {
        let transport = MockTransport::new();
        for _ in 0..2 {
            transport.push(MockReply::Error("connection reset".into()));
        }
        let rest = RequestHandler::new(
            RestOptions {
                retry_limit: 1,
                ..RestOptions::default()
            },
            None,
            transport.clone(),
        );
        let err = rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap_err();
        assert!(matches!(err, RestError::Transport { ref message, .. } if message == "connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_requests_time_out() {
        let transport = MockTransport::new();
        transport.push(MockReply::Hang);
        let rest = RequestHandler::new(
            RestOptions {
                retry_limit: 0,
                request_timeout: Duration::from_secs(1),
                ..RestOptions::default()
            },
            None,
            transport.clone(),
        );
        let err = rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap_err();
        assert!(matches!(err, RestError::Timeout { timeout, .. } if timeout == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_is_emitted_per_request() {
        let transport = MockTransport::new();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let rest = RequestHandler::with_events(RestOptions::default(), None, transport.clone(), events);
        rest.request(HttpMethod::Get, "/gateway", RequestOptions::new()).await.unwrap();
        match rx.recv().await.unwrap() {
            crate::events::CreatorEvent::RawRest(t) => {
                assert_eq!(t.status, 200);
                assert_eq!(t.route, "/gateway");
                assert_eq!(t.bucket, "GET:/gateway:global");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
