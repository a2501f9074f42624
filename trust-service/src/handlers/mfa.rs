//! MFA handlers. Challenge and verification run before a session exists;
//! enrollment does too until the principal has a confirmed factor. Device
//! and backup-code management need a session.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;

use crate::dtos::mfa::{
    BackupCodesResponse, ChallengeRequest, EnrollRequest, EnrollResponse, TrustDeviceRequest,
    VerifyRequest, VerifyResponse,
};
use crate::middleware::{ClientIp, CurrentSession, DEVICE_FINGERPRINT_HEADER};
use crate::models::{DeviceInfo, MfaMethod, TrustedDevice};
use crate::services::{Actor, ServiceError};
use crate::utils::ValidatedJson;
use crate::AppState;

#[tracing::instrument(skip(state, req), fields(principal_id = %req.principal_id, method = %req.method))]
pub async fn enroll(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    current: Option<CurrentSession>,
    ValidatedJson(req): ValidatedJson<EnrollRequest>,
) -> Result<(StatusCode, Json<EnrollResponse>), AppError> {
    if let Some(current) = &current {
        if current.principal_id() != req.principal_id {
            return Err(ServiceError::PermissionDenied(
                "cannot enroll factors for another principal".to_string(),
            )
            .into());
        }
    }
    let actor = Actor::new(req.principal_id)
        .with_ip(ip)
        .with_session(current.map(|c| c.session.id));
    let response = match req.method {
        MfaMethod::Totp => {
            let setup = state.mfa.enroll_totp(&actor, &req.destination).await?;
            EnrollResponse {
                method: MfaMethod::Totp,
                secret: Some(setup.secret),
                qr_payload: Some(setup.qr_payload),
                message: "Scan the QR payload and verify a code to finish enrollment".to_string(),
            }
        }
        MfaMethod::Sms | MfaMethod::Email => {
            if req.method == MfaMethod::Sms {
                state.mfa.enroll_sms(&actor, &req.destination).await?;
            } else {
                state.mfa.enroll_email(&actor, &req.destination).await?;
            }
            EnrollResponse {
                method: req.method,
                secret: None,
                qr_payload: None,
                message: "Verification code sent".to_string(),
            }
        }
        MfaMethod::BackupCode => {
            return Err(ServiceError::Validation(
                "backup codes are generated, not enrolled".to_string(),
            )
            .into())
        }
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[tracing::instrument(skip(state, req), fields(principal_id = %req.principal_id, method = %req.method))]
pub async fn send_challenge(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<ChallengeRequest>,
) -> Result<StatusCode, AppError> {
    let actor = Actor::new(req.principal_id).with_ip(ip);
    state.mfa.send_challenge(&actor, req.method).await?;
    Ok(StatusCode::ACCEPTED)
}

/// With the fingerprint header, a successful check returns a one-time
/// `verification_id` for opening a session from that device. With
/// `remember_device` it also trusts the device.
#[tracing::instrument(skip(state, headers, req), fields(principal_id = %req.principal_id, method = %req.method))]
pub async fn verify(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    let fingerprint = header_value(DEVICE_FINGERPRINT_HEADER).filter(|f| !f.trim().is_empty());
    if req.remember_device && fingerprint.is_none() {
        return Err(ServiceError::Validation(format!(
            "{} header is required to remember a device",
            DEVICE_FINGERPRINT_HEADER
        ))
        .into());
    }

    let actor = Actor::new(req.principal_id).with_ip(ip.clone());
    let verification = match &fingerprint {
        Some(fingerprint) => {
            state
                .mfa
                .verify_for_device(&actor, req.method, &req.code, fingerprint)
                .await?
        }
        None => state.mfa.verify(&actor, req.method, &req.code).await?,
    };

    let trusted_device = match fingerprint.filter(|_| req.remember_device) {
        Some(fingerprint) => {
            let info = DeviceInfo {
                fingerprint,
                name: req
                    .device_name
                    .unwrap_or_else(|| "Remembered device".to_string()),
                ip_address: ip,
                user_agent: header_value(header::USER_AGENT.as_str()),
            };
            Some(state.mfa.trust_device(&actor, info).await?)
        }
        None => None,
    };

    Ok(Json(VerifyResponse {
        verification,
        trusted_device,
    }))
}

pub async fn generate_backup_codes(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<(StatusCode, Json<BackupCodesResponse>), AppError> {
    let codes = state.mfa.generate_backup_codes(&current.actor()).await?;
    Ok((StatusCode::CREATED, Json(BackupCodesResponse { codes })))
}

pub async fn list_devices(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<Vec<TrustedDevice>>, AppError> {
    let devices = state
        .mfa
        .list_trusted_devices(current.principal_id())
        .await?;
    Ok(Json(devices))
}

/// Trusts the device the current session was opened from.
pub async fn trust_device(
    State(state): State<AppState>,
    current: CurrentSession,
    ValidatedJson(req): ValidatedJson<TrustDeviceRequest>,
) -> Result<(StatusCode, Json<TrustedDevice>), AppError> {
    let info = DeviceInfo {
        fingerprint: current.session.device_fingerprint.clone(),
        name: req.name,
        ip_address: current.ip_address.clone(),
        user_agent: current.user_agent.clone(),
    };
    let device = state.mfa.trust_device(&current.actor(), info).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

pub async fn revoke_device(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .mfa
        .revoke_trusted_device(&current.actor(), &device_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
