//! Shared setup for trust-service integration tests: in-memory stores, a
//! manual clock and a capturing challenge dispatcher.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;
use trust_service::{
    build_router,
    config::TrustConfig,
    models::{MfaMethod, NewPrincipal, NewSession, Principal, Role, Session},
    services::{
        store::{Backends, MfaStore},
        totp, Actor, Clock, ManualClock, MockDispatcher,
    },
    AppState,
};
use uuid::Uuid;

pub const DEVICE: &str = "device-fp-1";
pub const CLIENT_IP: &str = "10.0.0.1";

pub struct TestApp {
    pub state: AppState,
    pub backends: Backends,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<MockDispatcher>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(TrustConfig::default())
    }

    pub fn with_config(config: TrustConfig) -> Self {
        let backends = Backends::in_memory();
        let clock = Arc::new(ManualClock::default());
        let dispatcher = Arc::new(MockDispatcher::new());
        let state = AppState::new(config, backends.clone(), clock.clone(), dispatcher.clone())
            .expect("Failed to build app state");
        let router = build_router(state.clone());
        Self {
            state,
            backends,
            clock,
            dispatcher,
            router,
        }
    }

    pub async fn principal(&self, role: Role) -> Principal {
        let id = Uuid::new_v4().to_string();
        self.state
            .rbac
            .register_principal(
                &Actor::new("test-setup"),
                NewPrincipal {
                    id: Some(id.clone()),
                    email: format!("{}@example.com", &id[..8]),
                    display_name: format!("Test {}", role),
                    role,
                },
            )
            .await
            .expect("Failed to register principal")
    }

    /// Current code for the principal's pending TOTP secret, or for the
    /// confirmed one when nothing is pending.
    pub async fn totp_code(&self, principal_id: &str) -> String {
        let pending = self.backends.mfa.get_pending_totp(principal_id).await.unwrap();
        let enrollment = match pending {
            Some(enrollment) => enrollment,
            None => self
                .backends
                .mfa
                .get_totp(principal_id)
                .await
                .unwrap()
                .expect("TOTP not enrolled"),
        };
        totp::totp_at(&enrollment.secret, self.clock.now().timestamp()).unwrap()
    }

    /// Current code for the confirmed TOTP secret only.
    pub async fn confirmed_totp_code(&self, principal_id: &str) -> String {
        let enrollment = self
            .backends
            .mfa
            .get_totp(principal_id)
            .await
            .unwrap()
            .expect("TOTP not confirmed");
        totp::totp_at(&enrollment.secret, self.clock.now().timestamp()).unwrap()
    }

    /// Registers a principal with a pending TOTP secret.
    pub async fn enrolled(&self, role: Role) -> Principal {
        let principal = self.principal(role).await;
        self.state
            .mfa
            .enroll_totp(&Actor::new(principal.id.clone()), &principal.email)
            .await
            .unwrap();
        principal
    }

    /// Verifies the current TOTP code from `fingerprint` and returns the
    /// one-time verification id.
    pub async fn prove(&self, principal_id: &str, fingerprint: &str) -> String {
        let code = self.totp_code(principal_id).await;
        self.state
            .mfa
            .verify_for_device(&Actor::new(principal_id), MfaMethod::Totp, &code, fingerprint)
            .await
            .unwrap()
            .verification_id
            .expect("verification id issued")
    }

    /// Enrolls TOTP, verifies one code and opens a session on [`DEVICE`].
    pub async fn login(&self, role: Role) -> (Principal, Session) {
        let principal = self.enrolled(role).await;
        let verification_id = self.prove(&principal.id, DEVICE).await;
        let session = self
            .state
            .sessions
            .create_session(NewSession {
                principal_id: principal.id.clone(),
                role: None,
                device_fingerprint: DEVICE.to_string(),
                ip_address: Some(CLIENT_IP.to_string()),
                user_agent: None,
                mfa_verified: true,
                verification_id: Some(verification_id),
                trusted_device: false,
            })
            .await
            .unwrap();
        (principal, session)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }
}

/// JSON request from [`CLIENT_IP`], authenticated when a session is given.
/// Anonymous requests come from [`DEVICE`].
pub fn request(method: &str, uri: &str, session: Option<&Session>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP);
    builder = match session {
        Some(session) => builder
            .header("authorization", format!("Bearer {}", session.id))
            .header("x-device-fingerprint", &session.device_fingerprint),
        None => builder.header("x-device-fingerprint", DEVICE),
    };
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
