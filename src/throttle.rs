use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::requester::Requester;

/// Per-client request quotas. Anonymous clients are keyed by IP and get a
/// short burst window on top of the hourly quota; named users are keyed by
/// user name.
pub struct RequestThrottle {
    anon: DefaultKeyedRateLimiter<String>,
    user: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl RequestThrottle {
    pub fn new(anon_per_minute: u32, user_per_hour: u32) -> Self {
        let anon = Quota::per_minute(NonZeroU32::new(anon_per_minute).unwrap_or(NonZeroU32::MIN));
        let user = Quota::per_hour(NonZeroU32::new(user_per_hour).unwrap_or(NonZeroU32::MIN));
        Self {
            anon: RateLimiter::keyed(anon),
            user: RateLimiter::keyed(user),
            clock: DefaultClock::default(),
        }
    }

    /// `Err` carries how long the client has to wait.
    pub fn check(&self, requester: &Requester) -> Result<(), Duration> {
        let key = if requester.is_anonymous() {
            self.anon
                .check_key(&requester.ip)
                .map_err(|not_until| not_until.wait_time_from(self.clock.now()))?;
            format!("ip:{}", requester.ip)
        } else {
            format!("user:{}", requester.user)
        };
        self.user
            .check_key(&key)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

pub async fn throttle_requests(
    State(throttle): State<Arc<RequestThrottle>>,
    requester: Requester,
    request: Request,
    next: Next,
) -> Response {
    match throttle.check(&requester) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            warn!(
                user = %requester.user,
                ip = %requester.ip,
                path = %request.uri().path(),
                "Request throttled for {}s",
                seconds
            );
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "detail": format!("Request was throttled. Expected available in {} seconds.", seconds)
                })),
            )
                .into_response();
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(seconds));
            response
        }
    }
}
