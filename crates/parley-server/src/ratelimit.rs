//! Admission control and request logging middleware.
//!
//! Each guarded endpoint owns an [`AdmissionLimiter`]: a token bucket that
//! refills continuously and answers in constant time without waiting.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::time::Instant;

use parley_config::LimitConfig;

use crate::error::ServerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Token bucket
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RateState {
    capacity: f64,
    refill_per_sec: f64,
    /// Always within `0..=capacity`.
    available: f64,
    last_refill: Instant,
}

/// Non-blocking token bucket.
///
/// Starts full. Tokens come back at `refill_per_second`, fractionally, so a
/// bucket with rate 2/s has one token again after 0.5 s.
#[derive(Debug)]
pub struct AdmissionLimiter {
    state: Mutex<RateState>,
}

impl AdmissionLimiter {
    /// Create a full bucket. A negative or NaN rate means no refill.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            state: Mutex::new(RateState {
                capacity,
                refill_per_sec: refill_per_second.max(0.0),
                available: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(limit: &LimitConfig) -> Self {
        Self::new(limit.capacity, limit.refill_per_second)
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) against an explicit clock reading.
    ///
    /// Readings older than the last refill add nothing.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.available = (state.available + elapsed * state.refill_per_sec).min(state.capacity);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket, as of the last check.
    pub fn available(&self) -> f64 {
        self.state.lock().available
    }
}

/// Admission middleware for one guarded route.
///
/// Attach with `route_layer(from_fn_with_state(limiter, admission_middleware))`.
pub async fn admission_middleware(
    State(limiter): State<Arc<AdmissionLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Admission rejected");
    ServerError::RateLimited.into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Structured request logging middleware.
///
/// Logs method, path, status and duration, at a level chosen by status class.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
