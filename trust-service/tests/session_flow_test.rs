mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{request, TestApp, DEVICE};
use serde_json::json;
use trust_service::models::{MfaMethod, NewSession, Role};
use trust_service::services::store::MfaStore;
use trust_service::services::{Actor, Clock, ServiceError};

#[tokio::test]
async fn test_totp_enrollment_to_session() {
    let app = TestApp::new();
    let principal = app.principal(Role::Analyst).await;

    let (status, body) = app
        .send(request(
            "POST",
            "/mfa/enroll",
            None,
            Some(json!({
                "principal_id": principal.id,
                "method": "totp",
                "destination": principal.email,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["qr_payload"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));

    // No verification yet, so the MFA claim is rejected.
    let (status, _) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(json!({
                "principal_id": principal.id,
                "device_fingerprint": DEVICE,
                "mfa_verified": true,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A wrong code fails and leaves no way to open a session.
    let (status, _) = app
        .send(request(
            "POST",
            "/mfa/verify",
            None,
            Some(json!({ "principal_id": principal.id, "method": "totp", "code": "abcdef" })),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app
        .state
        .sessions
        .list_sessions(&principal.id)
        .await
        .unwrap()
        .is_empty());

    let code = app.totp_code(&principal.id).await;
    let (status, body) = app
        .send(request(
            "POST",
            "/mfa/verify",
            None,
            Some(json!({ "principal_id": principal.id, "method": "totp", "code": code })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "totp");
    let verification_id = body["verification_id"].as_str().unwrap().to_string();

    // The same code cannot be replayed.
    let (status, _) = app
        .send(request(
            "POST",
            "/mfa/verify",
            None,
            Some(json!({ "principal_id": principal.id, "method": "totp", "code": code })),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(json!({
                "principal_id": principal.id,
                "device_fingerprint": DEVICE,
                "mfa_verified": true,
                "verification_id": verification_id,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "analyst");
    assert_eq!(body["mfa_verified"], true);
    assert_eq!(body["ip_address"], common::CLIENT_IP);
    let session_id = body["id"].as_str().unwrap().to_string();

    let session = app.state.sessions.validate_session(&session_id, DEVICE).await.unwrap();
    let (status, body) = app
        .send(request("GET", "/sessions/current", Some(&session), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["principal_id"], principal.id);
}

#[tokio::test]
async fn test_session_bound_to_device() {
    let app = TestApp::new();
    let (_, mut session) = app.login(Role::Viewer).await;

    session.device_fingerprint = "some-other-device".to_string();
    let (status, _) = app
        .send(request("GET", "/sessions/current", Some(&session), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let app = TestApp::new();

    let (status, _) = app.send(request("GET", "/sessions/current", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            axum::http::Request::builder()
                .uri("/sessions/current")
                .header("authorization", "Bearer not-a-session")
                .header("x-device-fingerprint", DEVICE)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_destroyed_session_is_gone() {
    let app = TestApp::new();
    let (_, session) = app.login(Role::Viewer).await;

    let (status, _) = app
        .send(request("DELETE", "/sessions/current", Some(&session), None))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(matches!(
        app.state.sessions.validate_session(&session.id, DEVICE).await,
        Err(ServiceError::SessionNotFound)
    ));
    let (status, _) = app
        .send(request("GET", "/sessions/current", Some(&session), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_expiry_and_refresh_cap() {
    let app = TestApp::new();
    let (_, session) = app.login(Role::Viewer).await;
    let ttl = app.state.config.session.ttl_minutes;

    // Refreshing just before expiry extends by one TTL.
    app.clock.advance(Duration::minutes(ttl - 1));
    let (status, body) = app
        .send(request("POST", "/sessions/refresh", Some(&session), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["expires_at"].is_string());

    // Never past the maximum lifetime.
    let refreshed = app.state.sessions.validate_session(&session.id, DEVICE).await.unwrap();
    let max_lifetime = Duration::hours(app.state.config.session.max_lifetime_hours);
    assert!(refreshed.expires_at <= session.created_at + max_lifetime);

    app.clock.set(refreshed.expires_at + Duration::seconds(1));
    assert!(matches!(
        app.state.sessions.validate_session(&session.id, DEVICE).await,
        Err(ServiceError::SessionExpired)
    ));
}

#[tokio::test]
async fn test_mfa_claim_outside_trust_window_rejected() {
    let app = TestApp::new();
    let principal = app.enrolled(Role::Viewer).await;
    let verification_id = app.prove(&principal.id, DEVICE).await;

    app.clock
        .advance(Duration::minutes(app.state.config.mfa.trust_window_minutes + 1));
    let result = app
        .state
        .sessions
        .create_session(NewSession {
            principal_id: principal.id.clone(),
            role: None,
            device_fingerprint: DEVICE.to_string(),
            ip_address: None,
            user_agent: None,
            mfa_verified: true,
            verification_id: Some(verification_id),
            trusted_device: false,
        })
        .await;
    assert!(matches!(result, Err(ServiceError::MfaRequired)));
}

#[tokio::test]
async fn test_trusted_device_skips_mfa() {
    let app = TestApp::new();
    let (principal, session) = app.login(Role::Viewer).await;

    let (status, body) = app
        .send(request(
            "POST",
            "/mfa/devices",
            Some(&session),
            Some(json!({ "name": "Work laptop" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["fingerprint"], DEVICE);

    // Well past the MFA trust window, the trusted device alone is enough.
    app.clock.advance(Duration::days(2));
    let later = app
        .state
        .sessions
        .create_session(NewSession {
            principal_id: principal.id.clone(),
            role: None,
            device_fingerprint: DEVICE.to_string(),
            ip_address: None,
            user_agent: None,
            mfa_verified: false,
            verification_id: None,
            trusted_device: true,
        })
        .await
        .unwrap();
    assert!(later.trusted_device);
    assert!(!later.mfa_verified);
    assert!(later.expires_at > app.clock.now());

    // A different device is not covered.
    let other = app
        .state
        .sessions
        .create_session(NewSession {
            principal_id: principal.id,
            role: None,
            device_fingerprint: "unknown-device".to_string(),
            ip_address: None,
            user_agent: None,
            mfa_verified: false,
            verification_id: None,
            trusted_device: true,
        })
        .await;
    assert!(matches!(other, Err(ServiceError::MfaRequired)));
}

#[tokio::test]
async fn test_deactivation_ends_sessions() {
    let app = TestApp::new();
    let (_, admin_session) = app.login(Role::Admin).await;
    let (viewer, viewer_session) = app.login(Role::Viewer).await;

    let (status, _) = app
        .send(request(
            "POST",
            &format!("/principals/{}/deactivate", viewer.id),
            Some(&admin_session),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(request("GET", "/sessions/current", Some(&viewer_session), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_verify_can_remember_device() {
    let app = TestApp::new();
    let principal = app.principal(Role::Viewer).await;
    app.state
        .mfa
        .enroll_totp(&Actor::new(principal.id.clone()), &principal.email)
        .await
        .unwrap();
    let code = app.totp_code(&principal.id).await;

    let mut verify = request(
        "POST",
        "/mfa/verify",
        None,
        Some(json!({
            "principal_id": principal.id,
            "method": "totp",
            "code": code,
            "remember_device": true,
            "device_name": "Desk laptop",
        })),
    );
    verify
        .headers_mut()
        .insert("x-device-fingerprint", DEVICE.parse().unwrap());
    let (status, body) = app.send(verify).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "totp");
    assert_eq!(body["trusted_device"]["name"], "Desk laptop");

    assert!(app
        .state
        .mfa
        .is_trusted_device(&principal.id, DEVICE)
        .await
        .unwrap());
}

fn session_request(principal_id: &str, fingerprint: &str, verification_id: &str) -> serde_json::Value {
    json!({
        "principal_id": principal_id,
        "device_fingerprint": fingerprint,
        "mfa_verified": true,
        "verification_id": verification_id,
    })
}

#[tokio::test]
async fn test_verification_opens_one_session_on_its_device() {
    let app = TestApp::new();
    let principal = app.enrolled(Role::Analyst).await;
    let code = app.totp_code(&principal.id).await;

    let (status, body) = app
        .send(request(
            "POST",
            "/mfa/verify",
            None,
            Some(json!({ "principal_id": principal.id, "method": "totp", "code": code })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let verification_id = body["verification_id"].as_str().unwrap().to_string();

    // Another device cannot use it.
    let (status, _) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(session_request(&principal.id, "attacker-fp", &verification_id)),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(session_request(&principal.id, DEVICE, &verification_id)),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Spent after one session.
    let (status, _) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(session_request(&principal.id, DEVICE, &verification_id)),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.sessions.list_sessions(&principal.id).await.unwrap().len(), 1);

    // Another principal's proof does not open this principal's session.
    let other = app.enrolled(Role::Viewer).await;
    let other_proof = app.prove(&other.id, DEVICE).await;
    let result = app
        .state
        .sessions
        .create_session(NewSession {
            principal_id: principal.id.clone(),
            role: None,
            device_fingerprint: DEVICE.to_string(),
            ip_address: None,
            user_agent: None,
            mfa_verified: true,
            verification_id: Some(other_proof),
            trusted_device: false,
        })
        .await;
    assert!(matches!(result, Err(ServiceError::MfaRequired)));
}

#[tokio::test]
async fn test_enrolled_principal_cannot_be_reenrolled_anonymously() {
    let app = TestApp::new();
    let (admin, admin_session) = app.login(Role::Admin).await;
    let original = app.backends.mfa.get_totp(&admin.id).await.unwrap().unwrap().secret;
    app.clock.advance(Duration::minutes(10));

    for (method, destination) in [("totp", admin.email.as_str()), ("sms", "+14155550123")] {
        let (status, _) = app
            .send(request(
                "POST",
                "/mfa/enroll",
                None,
                Some(json!({ "principal_id": admin.id, "method": method, "destination": destination })),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", method);
    }
    assert!(app.backends.mfa.get_pending_totp(&admin.id).await.unwrap().is_none());
    assert!(app
        .backends
        .mfa
        .get_pending_contact(&admin.id, MfaMethod::Sms)
        .await
        .unwrap()
        .is_none());

    // A verification from the attacker's side is impossible without a code,
    // so no session can be opened on their device.
    let (status, _) = app
        .send(request(
            "POST",
            "/sessions",
            None,
            Some(json!({
                "principal_id": admin.id,
                "device_fingerprint": "attacker-fp",
                "mfa_verified": true,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Inside a session the verification must still be fresh.
    let enroll_totp = json!({ "principal_id": admin.id, "method": "totp", "destination": admin.email });
    let (status, _) = app
        .send(request("POST", "/mfa/enroll", Some(&admin_session), Some(enroll_totp.clone())))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A session cannot enroll factors for someone else.
    let (_, viewer_session) = app.login(Role::Viewer).await;
    let (status, _) = app
        .send(request("POST", "/mfa/enroll", Some(&viewer_session), Some(enroll_totp.clone())))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let code = app.confirmed_totp_code(&admin.id).await;
    app.state
        .mfa
        .verify(&Actor::new(admin.id.clone()), MfaMethod::Totp, &code)
        .await
        .unwrap();
    let (status, body) = app
        .send(request("POST", "/mfa/enroll", Some(&admin_session), Some(enroll_totp)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["secret"].is_string());

    // The confirmed secret keeps working until the new one verifies.
    assert_eq!(
        app.backends.mfa.get_totp(&admin.id).await.unwrap().unwrap().secret,
        original
    );
    app.clock.advance(Duration::seconds(30));
    let code = app.confirmed_totp_code(&admin.id).await;
    app.state
        .mfa
        .verify(&Actor::new(admin.id.clone()), MfaMethod::Totp, &code)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sign_out_everywhere() {
    let app = TestApp::new();
    let (principal, first) = app.login(Role::Viewer).await;
    app.clock.advance(Duration::seconds(30));
    let verification_id = app.prove(&principal.id, "device-fp-2").await;
    let second = app
        .state
        .sessions
        .create_session(NewSession {
            principal_id: principal.id.clone(),
            role: None,
            device_fingerprint: "device-fp-2".to_string(),
            ip_address: None,
            user_agent: None,
            mfa_verified: true,
            verification_id: Some(verification_id),
            trusted_device: false,
        })
        .await
        .unwrap();
    let (other, other_session) = app.login(Role::Viewer).await;

    let (status, body) = app
        .send(request("DELETE", "/sessions/active", Some(&first), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions_ended"], 2);

    for session in [&first, &second] {
        let (status, _) = app
            .send(request("GET", "/sessions/current", Some(session), None))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert!(app.state.sessions.list_sessions(&principal.id).await.unwrap().is_empty());
    assert_eq!(app.state.sessions.list_sessions(&other.id).await.unwrap().len(), 1);
    let (status, _) = app
        .send(request("GET", "/sessions/current", Some(&other_session), None))
        .await;
    assert_eq!(status, StatusCode::OK);
}
