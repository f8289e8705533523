//! Per-route rate-limit bucket.
//!
//! A bucket owns one route's token state and pushes its requests through a
//! [`SequentialMutex`], so at most one of them is on the wire at a time.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CapturedStack, DiscordHttpError, RestError};
use crate::events::{CreatorEvent, RestTelemetry};
use crate::rest::handler::HandlerInner;
use crate::rest::mutex::SequentialMutex;
use crate::rest::request::Request;
use crate::rest::transport::RawResponse;
use crate::util;

// ---------------------------------------------------------------------------
// Rate-limit headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Unix seconds at which the bucket resets.
    pub reset_at: Option<f64>,
    /// Seconds until the bucket resets.
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}

pub(crate) fn parse_rate_limit_headers(resp: &RawResponse) -> RateLimitInfo {
    let number = |name: &str| resp.header(name).and_then(|s| s.parse::<f64>().ok());

    RateLimitInfo {
        limit: resp
            .header("x-ratelimit-limit")
            .and_then(|s| s.parse::<u32>().ok()),
        remaining: resp
            .header("x-ratelimit-remaining")
            .and_then(|s| s.parse::<u32>().ok()),
        reset_at: number("x-ratelimit-reset"),
        reset_after: number("x-ratelimit-reset-after"),
        bucket: resp.header("x-ratelimit-bucket").map(str::to_string),
        is_global: resp.header("x-ratelimit-global").is_some(),
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// SequentialBucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: u32,
    reset: Instant,
}

impl BucketState {
    /// Refill once the reset instant has passed.
    fn refresh(&mut self, now: Instant) {
        if now >= self.reset {
            self.remaining = self.limit;
        }
    }
}

#[derive(Debug)]
pub struct SequentialBucket {
    id: String,
    hash: String,
    mutex: SequentialMutex,
    state: Mutex<BucketState>,
}

impl SequentialBucket {
    /// A bucket starts pessimistic: one request at a time until real headers
    /// arrive.
    pub(crate) fn new(hash: impl Into<String>, major_parameter: &str) -> Self {
        let hash = hash.into();
        Self {
            id: format!("{}:{}", hash, major_parameter),
            hash,
            mutex: SequentialMutex::new(),
            state: Mutex::new(BucketState {
                limit: 1,
                remaining: 1,
                reset: Instant::now(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `hash:majorParameter`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn limit(&self) -> u32 {
        self.lock_state().limit
    }

    pub fn remaining(&self) -> u32 {
        let mut state = self.lock_state();
        state.refresh(Instant::now());
        state.remaining
    }

    /// Out of tokens until the reset instant.
    pub fn limited(&self) -> bool {
        !self.wait_time().is_zero()
    }

    /// How long the next request would have to wait for this bucket.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock_state();
        state.refresh(now);
        if state.remaining == 0 {
            state.reset.saturating_duration_since(now)
        } else {
            Duration::ZERO
        }
    }

    /// Requests waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.mutex.queued()
    }

    /// Queue `request` behind this bucket's earlier requests and run it.
    pub(crate) async fn add(&self, handler: &HandlerInner, request: Request) -> Result<Value, RestError> {
        // Captured before any await so errors still point at the caller.
        let stack = CapturedStack::capture();
        let _slot = self.mutex.acquire(request.options.jump_queue).await;
        self.execute(handler, &request, stack).await
    }

    async fn wait_for_capacity(&self, handler: &HandlerInner) {
        loop {
            if let Some(global) = handler.global_timeout() {
                debug!(bucket = %self.id, "waiting for global rate limit");
                global.await;
                continue;
            }
            let wait = self.wait_time();
            if wait.is_zero() {
                return;
            }
            debug!(
                bucket = %self.id,
                delay_ms = wait.as_millis() as u64,
                "rate-limit pre-emptive backoff"
            );
            tokio::time::sleep(wait).await;
        }
    }

    fn consume(&self) {
        let mut state = self.lock_state();
        state.remaining = state.remaining.saturating_sub(1);
    }

    async fn execute(
        &self,
        handler: &HandlerInner,
        request: &Request,
        stack: CapturedStack,
    ) -> Result<Value, RestError> {
        let prepared = request.prepare(&handler.options, handler.authorization.as_deref())?;
        let retry_limit = handler.options.retry_limit;
        let mut attempts = 0u32;

        loop {
            self.wait_for_capacity(handler).await;
            self.consume();

            let started = Instant::now();
            let sent = tokio::time::timeout(
                handler.options.request_timeout,
                handler.transport.send(prepared.clone()),
            )
            .await;

            let response = match sent {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    if attempts < retry_limit {
                        attempts += 1;
                        warn!(route = %request.route(), attempt = attempts, error = %err, "transport error, retrying");
                        continue;
                    }
                    return Err(RestError::Transport {
                        method: request.method,
                        path: request.path.clone(),
                        message: err.to_string(),
                        stack,
                    });
                }
                Err(_elapsed) => {
                    if attempts < retry_limit {
                        attempts += 1;
                        warn!(route = %request.route(), attempt = attempts, "request timed out, retrying");
                        continue;
                    }
                    return Err(RestError::Timeout {
                        method: request.method,
                        path: request.path.clone(),
                        timeout: handler.options.request_timeout,
                        stack,
                    });
                }
            };

            let info = parse_rate_limit_headers(&response);
            self.handle(handler, request, &info);
            self.report(handler, request, &response, started.elapsed());

            match response.status {
                200..=299 => {
                    if response.is_json() {
                        return Ok(serde_json::from_slice(&response.body)?);
                    }
                    return Ok(Value::Null);
                }
                429 => {
                    let body = response.body_value();
                    let retry_after = body
                        .get("retry_after")
                        .and_then(Value::as_f64)
                        .or(info.reset_after)
                        .map(seconds)
                        .unwrap_or(Duration::from_secs(1));
                    let global = info.is_global
                        || body.get("global").and_then(Value::as_bool).unwrap_or(false);
                    warn!(
                        route = %request.route(),
                        bucket = %self.id,
                        retry_after_ms = retry_after.as_millis() as u64,
                        global,
                        "rate-limited by Discord, backing off"
                    );
                    if global {
                        handler.set_global_timeout(retry_after);
                    } else {
                        self.block_for(retry_after + handler.options.ratelimiter_offset);
                    }
                }
                500..=599 => {
                    if attempts < retry_limit {
                        attempts += 1;
                        warn!(
                            route = %request.route(),
                            status = response.status,
                            attempt = attempts,
                            "server error, retrying"
                        );
                        continue;
                    }
                    return Err(self.http_error(request, &response, stack).into());
                }
                400..=499 => return Err(self.http_error(request, &response, stack).into()),
                _ => return Ok(Value::Null),
            }
        }
    }

    /// Apply a response's rate-limit headers to this bucket and the
    /// handler's hash table.
    fn handle(&self, handler: &HandlerInner, request: &Request, info: &RateLimitInfo) {
        let now = Instant::now();
        let offset = handler.options.ratelimiter_offset;
        {
            let mut state = self.lock_state();
            state.limit = info.limit.unwrap_or(u32::MAX);
            state.remaining = info.remaining.unwrap_or(1);
            state.reset = match (info.reset_after, info.reset_at) {
                (Some(after), _) => now + seconds(after) + offset,
                (None, Some(at)) => {
                    let until_ms = (at * 1000.0) - util::now_unix_ms() as f64;
                    now + seconds(until_ms / 1000.0) + offset
                }
                (None, None) => now,
            };
        }
        if let Some(hash) = &info.bucket {
            handler.learn_hash(&request.request_id(), hash, &self.hash);
        }
    }

    fn block_for(&self, wait: Duration) {
        let mut state = self.lock_state();
        state.remaining = 0;
        state.reset = Instant::now() + wait;
    }

    fn report(&self, handler: &HandlerInner, request: &Request, response: &RawResponse, latency: Duration) {
        let (limit, remaining, reset_after) = {
            let state = self.lock_state();
            (
                state.limit,
                state.remaining,
                state.reset.saturating_duration_since(Instant::now()),
            )
        };
        handler.events.emit(CreatorEvent::RawRest(RestTelemetry {
            method: request.method,
            path: request.path.clone(),
            route: request.route().to_string(),
            bucket: self.id.clone(),
            status: response.status,
            latency,
            limit,
            remaining,
            reset_after,
        }));
    }

    fn http_error(&self, request: &Request, response: &RawResponse, stack: CapturedStack) -> DiscordHttpError {
        DiscordHttpError::new(
            response.status,
            response.body_value(),
            request.method,
            request.path.clone(),
            stack,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_limit_headers() {
        let resp = RawResponse::new(200)
            .with_header("X-RateLimit-Limit", "5")
            .with_header("X-RateLimit-Remaining", "4")
            .with_header("X-RateLimit-Reset-After", "1.5")
            .with_header("X-RateLimit-Reset", "1700000000.25")
            .with_header("X-RateLimit-Bucket", "abcd1234");
        let info = parse_rate_limit_headers(&resp);
        assert_eq!(info.limit, Some(5));
        assert_eq!(info.remaining, Some(4));
        assert_eq!(info.reset_after, Some(1.5));
        assert_eq!(info.reset_at, Some(1_700_000_000.25));
        assert_eq!(info.bucket.as_deref(), Some("abcd1234"));
        assert!(!info.is_global);
    }

    #[test]
    fn global_flag_is_presence_based() {
        let resp = RawResponse::new(429).with_header("x-ratelimit-global", "true");
        assert!(parse_rate_limit_headers(&resp).is_global);
    }

    #[test]
    fn absent_headers_leave_fields_empty() {
        assert_eq!(parse_rate_limit_headers(&RawResponse::new(204)), RateLimitInfo::default());
    }

    #[tokio::test(start_paused = true)]
    async fn new_bucket_allows_exactly_one_send() {
        let bucket = SequentialBucket::new("GET:/gateway", "global");
        assert_eq!(bucket.id(), "GET:/gateway:global");
        assert_eq!(bucket.limit(), 1);
        assert!(!bucket.limited());
        bucket.consume();
        assert_eq!(bucket.remaining(), 1, "reset already passed, so it refills");
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_bucket_reports_wait_time() {
        let bucket = SequentialBucket::new("h", "1");
        bucket.block_for(Duration::from_millis(500));
        assert!(bucket.limited());
        assert_eq!(bucket.wait_time(), Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!bucket.limited());
        assert_eq!(bucket.remaining(), 1);
    }

    #[test]
    fn negative_and_nan_seconds_clamp_to_zero() {
        assert_eq!(seconds(-3.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(0.25), Duration::from_millis(250));
    }
}
