use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::client_ip;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use crate::models::{AccessContext, Session};
use crate::services::Actor;
use crate::AppState;

pub const DEVICE_FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// The validated session behind the current request.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub session: Session,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl CurrentSession {
    pub fn principal_id(&self) -> &str {
        &self.session.principal_id
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.session.principal_id.clone())
            .with_ip(self.ip_address.clone())
            .with_session(Some(self.session.id.clone()))
    }

    pub fn access_context(&self) -> AccessContext {
        AccessContext {
            principal_id: self.session.principal_id.clone(),
            session_id: Some(self.session.id.clone()),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

pub fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn authenticate<'a>(
    state: &'a AppState,
    req: &Request,
) -> impl Future<Output = Result<CurrentSession, AppError>> + Send + 'a {
    // Everything read from the request is extracted up front: `&Request` is
    // not `Send`, so it must not be held across the await below.
    let session_id = bearer_token(req)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header")))
        .map(|token| token.to_string());
    let fingerprint = req
        .headers()
        .get(DEVICE_FINGERPRINT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing device fingerprint")))
        .map(|value| value.to_string());
    let ip_address = client_ip(req).map(|ip| ip.to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string());

    async move {
        let session_id = session_id?;
        let fingerprint = fingerprint?;

        let session = state
            .sessions
            .validate_session(&session_id, &fingerprint)
            .await?;

        Ok(CurrentSession {
            session,
            ip_address,
            user_agent,
        })
    }
}

/// Requires `Authorization: Bearer <session id>` plus the device fingerprint
/// the session was opened from.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = authenticate(&state, &req).await?;
    req.extensions_mut().insert(current);

    Ok(next.run(req).await)
}

/// For routes open to anonymous callers that behave differently inside a
/// session. A bearer token that is present must still validate.
pub async fn optional_session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.headers().contains_key(header::AUTHORIZATION) {
        let current = authenticate(&state, &req).await?;
        req.extensions_mut().insert(current);
    }

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Session missing from request extensions"))
            })
    }
}

/// Caller address for routes that run before a session exists.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });
        Ok(ClientIp(ip.map(|ip| ip.to_string())))
    }
}
