//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::BoxError;
use crate::rest::transport::{PreparedRequest, RawResponse, Transport};

#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    Response(RawResponse),
    Error(String),
    /// Never completes; exercises the per-request timeout.
    Hang,
}

impl MockReply {
    pub(crate) fn json(status: u16, body: serde_json::Value) -> Self {
        Self::Response(RawResponse::new(status).with_json(&body))
    }
}

/// Replies are served in push order; once the script runs out every request
/// gets `200 {}`.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<(Instant, PreparedRequest)>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub(crate) fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn sent_at(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// Requests whose URL ends with `suffix` (query string ignored).
    pub(crate) fn requests_to(&self, suffix: &str) -> Vec<PreparedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.split('?').next().unwrap_or("").ends_with(suffix))
            .collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, BoxError> {
        self.requests.lock().unwrap().push((Instant::now(), request));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Error(message)) => Err(message.into()),
            Some(MockReply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(RawResponse::new(200).with_json(&serde_json::json!({}))),
        }
    }
}
