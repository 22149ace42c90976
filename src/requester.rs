use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

pub const ANONYMOUS_USER: &str = "AnonymousUser";

/// Who made the request, for log traceability. Authentication happens
/// upstream; the identity arrives in `X-Remote-User`.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub user: String,
    pub ip: String,
}

impl Requester {
    pub fn is_anonymous(&self) -> bool {
        self.user == ANONYMOUS_USER
    }
}

impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get("x-remote-user")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();

        // First hop of X-Forwarded-For, else the socket peer
        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Requester { user, ip })
    }
}
