//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chunkforge_common::{config::RateLimitConfig, AppError, Result};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create a new rate limiter
pub fn create_rate_limiter(config: &RateLimitConfig) -> Result<Arc<GlobalRateLimiter>> {
    let per_second = NonZeroU32::new(config.requests_per_second)
        .ok_or_else(|| AppError::configuration("rate_limit.requests_per_second must be positive"))?;
    let burst = NonZeroU32::new(config.burst)
        .ok_or_else(|| AppError::configuration("rate_limit.burst must be positive"))?;

    Ok(Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst))))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<GlobalRateLimiter>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}
