pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;
pub mod workers;

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::TrustConfig;
use crate::services::crypto::DocumentCipher;
use crate::services::store::Backends;
use crate::services::{
    AuditGateway, ChallengeDispatcher, Clock, DocumentSecurityService, MfaService, RbacService,
    ServiceError, SessionManager, VersionService,
};
use crate::workers::ExpirySweeper;

#[derive(Clone)]
pub struct AppState {
    pub config: TrustConfig,
    pub audit: AuditGateway,
    pub rbac: RbacService,
    pub mfa: MfaService,
    pub sessions: SessionManager,
    pub security: DocumentSecurityService,
    pub versions: VersionService,
    pub mfa_verify_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wires every service over one set of storage backends and one clock.
    pub fn new(
        config: TrustConfig,
        backends: Backends,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn ChallengeDispatcher>,
    ) -> Result<Self, ServiceError> {
        let audit = AuditGateway::new(
            backends.audit.clone(),
            clock.clone(),
            std::time::Duration::from_millis(config.audit.retry_max_elapsed_ms),
        );

        let rbac = RbacService::new(
            backends.principals.clone(),
            backends.permissions.clone(),
            backends.sessions.clone(),
            audit.clone(),
            clock.clone(),
        );
        let mfa = MfaService::new(
            backends.principals.clone(),
            backends.mfa.clone(),
            backends.devices.clone(),
            dispatcher,
            audit.clone(),
            clock.clone(),
            config.mfa.clone(),
        );
        let sessions = SessionManager::new(
            backends.sessions.clone(),
            backends.principals.clone(),
            mfa.clone(),
            audit.clone(),
            clock.clone(),
            config.session.clone(),
        );

        let cipher = DocumentCipher::new(&config.documents.master_key)?;
        let security = DocumentSecurityService::new(
            backends.access_events.clone(),
            backends.dlp.clone(),
            backends.policies.clone(),
            cipher,
            audit.clone(),
            clock.clone(),
            config.documents.download_limit_per_day,
        )?;
        let versions = VersionService::new(
            backends.locks.clone(),
            backends.versions.clone(),
            security.clone(),
            audit.clone(),
            clock,
            chrono::Duration::minutes(config.documents.lock_default_ttl_minutes),
        );

        let mfa_verify_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.mfa_verify_attempts,
            config.rate_limit.mfa_verify_window_seconds,
        );

        Ok(Self {
            config,
            audit,
            rbac,
            mfa,
            sessions,
            security,
            versions,
            mfa_verify_rate_limiter,
        })
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.sessions.clone(),
            self.mfa.clone(),
            self.versions.clone(),
            std::time::Duration::from_secs(self.config.sweep_interval_seconds.max(1)),
        )
    }
}

pub fn build_router(state: AppState) -> Router {
    let verify_limiter = state.mfa_verify_rate_limiter.clone();
    let verify_route = Router::new()
        .route("/mfa/verify", post(handlers::mfa::verify))
        .layer(from_fn_with_state(verify_limiter, ip_rate_limit_middleware));

    let enroll_route = Router::new()
        .route("/mfa/enroll", post(handlers::enroll))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::optional_session_middleware,
        ));

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/principals", post(handlers::register_principal))
        .route("/mfa/challenge", post(handlers::send_challenge))
        .route("/sessions", post(handlers::create_session))
        .merge(verify_route)
        .merge(enroll_route);

    let session_routes = Router::new()
        .route(
            "/sessions/active",
            get(handlers::list_sessions).delete(handlers::destroy_all_sessions),
        )
        .route(
            "/sessions/current",
            get(handlers::current_session).delete(handlers::destroy_session),
        )
        .route("/sessions/refresh", post(handlers::refresh_session))
        .route("/mfa/backup-codes", post(handlers::generate_backup_codes))
        .route(
            "/mfa/devices",
            get(handlers::list_devices).post(handlers::trust_device),
        )
        .route("/mfa/devices/:device_id", delete(handlers::revoke_device))
        .route("/principals/:principal_id/role", put(handlers::assign_role))
        .route(
            "/principals/:principal_id/deactivate",
            post(handlers::deactivate_principal),
        )
        .route("/permissions/check", post(handlers::check_permission))
        .route(
            "/permissions/grants",
            post(handlers::grant_permission).delete(handlers::revoke_permission),
        )
        .route(
            "/documents/:document_id/scan",
            get(handlers::get_scan).post(handlers::scan_document),
        )
        .route(
            "/documents/:document_id/scan/review",
            post(handlers::review_scan),
        )
        .route(
            "/documents/:document_id/policy",
            get(handlers::get_policy).put(handlers::set_policy),
        )
        .route(
            "/documents/:document_id/authorize",
            post(handlers::authorize_action),
        )
        .route("/documents/:document_id/access", post(handlers::log_access))
        .route(
            "/documents/:document_id/access/summary",
            get(handlers::access_summary),
        )
        .route(
            "/documents/:document_id/watermark",
            post(handlers::watermark_content),
        )
        .route(
            "/documents/:document_id/watermark/extract",
            post(handlers::extract_watermark),
        )
        .route(
            "/documents/:document_id/lock",
            get(handlers::get_lock)
                .put(handlers::acquire_lock)
                .delete(handlers::release_lock),
        )
        .route(
            "/documents/:document_id/versions",
            get(handlers::list_versions).post(handlers::create_version),
        )
        .route(
            "/documents/:document_id/versions/:version_id",
            get(handlers::get_version),
        )
        .route(
            "/documents/:document_id/versions/:version_id/content",
            get(handlers::version_content),
        )
        .route(
            "/documents/:document_id/versions/:version_id/submit",
            post(handlers::submit_version),
        )
        .route(
            "/documents/:document_id/versions/:version_id/approve",
            post(handlers::approve_version),
        )
        .route("/audit", get(handlers::query_audit))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    public_routes
        .merge(session_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
