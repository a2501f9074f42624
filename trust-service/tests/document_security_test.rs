mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{request, TestApp};
use serde_json::json;
use trust_service::models::{AccessAction, AuditAction, AuditQuery, Role, Session};

async fn set_policy(app: &TestApp, manager: &Session, document_id: &str, policy: serde_json::Value) {
    let (status, _) = app
        .send(request(
            "PUT",
            &format!("/documents/{}/policy", document_id),
            Some(manager),
            Some(policy),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_critical_scan_blocks_access_until_reviewed() {
    let app = TestApp::new();
    let (_, analyst) = app.login(Role::Analyst).await;
    let (viewer_principal, viewer) = app.login(Role::Viewer).await;
    let (_, reviewer) = app.login(Role::Reviewer).await;

    let (status, scan) = app
        .send(request(
            "POST",
            "/documents/doc-1/scan",
            Some(&analyst),
            Some(json!({ "content": "Employee SSN: 123-45-6789" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scan["risk_level"], "critical");
    assert_eq!(scan["approved"], false);
    // Raw values never leave the scanner.
    assert!(!scan.to_string().contains("123-45-6789"));

    let (status, body) = app
        .send(request(
            "POST",
            "/documents/doc-1/access",
            Some(&viewer),
            Some(json!({ "action": "view" })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("review"));

    let denials = app
        .state
        .audit
        .query(&AuditQuery {
            principal_id: Some(viewer_principal.id.clone()),
            action: Some(AuditAction::DocumentAccessDenied),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(denials.len(), 1);

    // Viewers cannot clear a scan.
    let (status, _) = app
        .send(request("POST", "/documents/doc-1/scan/review", Some(&viewer), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, reviewed) = app
        .send(request("POST", "/documents/doc-1/scan/review", Some(&reviewer), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["approved"], true);

    let (status, event) = app
        .send(request(
            "POST",
            "/documents/doc-1/access",
            Some(&viewer),
            Some(json!({ "action": "view" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(event["action"], "view");
}

#[tokio::test]
async fn test_fourth_download_in_a_day_is_denied() {
    let app = TestApp::new();
    let (_, manager) = app.login(Role::Manager).await;
    let (_, viewer) = app.login(Role::Viewer).await;
    let (_, other) = app.login(Role::Viewer).await;
    set_policy(
        &app,
        &manager,
        "doc-2",
        json!({ "download_restrictions": true, "max_downloads_per_day": 3 }),
    )
    .await;
    let download = json!({ "action": "download" });

    for _ in 0..3 {
        let (status, _) = app
            .send(request(
                "POST",
                "/documents/doc-2/access",
                Some(&viewer),
                Some(download.clone()),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .send(request(
            "POST",
            "/documents/doc-2/access",
            Some(&viewer),
            Some(download.clone()),
        ))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("3"));

    // A policy in the request body has no say.
    let (status, _) = app
        .send(request(
            "POST",
            "/documents/doc-2/access",
            Some(&viewer),
            Some(json!({ "action": "download", "policy": { "download_restrictions": false } })),
        ))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // The window is per principal.
    let (status, _) = app
        .send(request(
            "POST",
            "/documents/doc-2/access",
            Some(&other),
            Some(download.clone()),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The dry run reports the same decision without logging anything.
    let (status, decision) = app
        .send(request(
            "POST",
            "/documents/doc-2/authorize",
            Some(&viewer),
            Some(download.clone()),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allowed"], false);

    // The trailing window moves on.
    app.clock.advance(Duration::hours(25));
    let decision = app
        .state
        .security
        .can_perform_action("doc-2", &viewer.principal_id, AccessAction::Download)
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_rbac_denies_guest_download() {
    let app = TestApp::new();
    let (guest_principal, guest) = app.login(Role::Guest).await;

    let (status, _) = app
        .send(request(
            "POST",
            "/documents/doc-3/access",
            Some(&guest),
            Some(json!({ "action": "download" })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let denials = app
        .state
        .audit
        .query(&AuditQuery {
            principal_id: Some(guest_principal.id),
            action: Some(AuditAction::DocumentAccessDenied),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(denials.len(), 1);
    assert!(denials[0].details.contains("permission_denied"));
}

#[tokio::test]
async fn test_print_restriction() {
    let app = TestApp::new();
    let (_, manager) = app.login(Role::Manager).await;
    let (_, analyst) = app.login(Role::Analyst).await;
    set_policy(&app, &manager, "doc-4", json!({ "print_restrictions": true })).await;

    let print = json!({ "action": "print" });
    let (status, _) = app
        .send(request("POST", "/documents/doc-4/access", Some(&analyst), Some(print.clone())))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Analysts can read the policy but not change it.
    let (status, policy) = app
        .send(request("GET", "/documents/doc-4/policy", Some(&analyst), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["print_restrictions"], true);
    let (status, _) = app
        .send(request(
            "PUT",
            "/documents/doc-4/policy",
            Some(&analyst),
            Some(json!({ "print_restrictions": false })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    set_policy(&app, &manager, "doc-4", json!({ "print_restrictions": false })).await;
    let (status, _) = app
        .send(request("POST", "/documents/doc-4/access", Some(&analyst), Some(print)))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let updates = app
        .state
        .audit
        .query(&AuditQuery {
            action: Some(AuditAction::DocumentPolicyUpdated),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn test_watermark_traces_recipient() {
    let app = TestApp::new();
    let (viewer_principal, viewer) = app.login(Role::Viewer).await;
    let (_, reviewer) = app.login(Role::Reviewer).await;

    let (status, body) = app
        .send(request(
            "POST",
            "/documents/doc-5/watermark",
            Some(&viewer),
            Some(json!({ "content": "Confidential information memorandum" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let marked = body["content"].as_str().unwrap().to_string();
    assert!(marked.contains(&viewer_principal.email));
    assert!(marked.contains("Confidential information memorandum"));

    // Only roles that can read the audit log may trace a copy.
    let (status, _) = app
        .send(request(
            "POST",
            "/documents/doc-5/watermark/extract",
            Some(&viewer),
            Some(json!({ "content": marked })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, tag) = app
        .send(request(
            "POST",
            "/documents/doc-5/watermark/extract",
            Some(&reviewer),
            Some(json!({ "content": marked })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tag["principal_id"], viewer_principal.id);

    // A tag is bound to its document.
    let (status, _) = app
        .send(request(
            "POST",
            "/documents/other-doc/watermark/extract",
            Some(&reviewer),
            Some(json!({ "content": marked })),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_access_summary_counts_events() {
    let app = TestApp::new();
    let (_, viewer) = app.login(Role::Viewer).await;
    let (_, manager) = app.login(Role::Manager).await;

    for action in ["view", "view", "download"] {
        let (status, _) = app
            .send(request(
                "POST",
                "/documents/doc-6/access",
                Some(&viewer),
                Some(json!({ "action": action })),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, summary) = app
        .send(request(
            "GET",
            "/documents/doc-6/access/summary",
            Some(&manager),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_events"], 3);
    assert_eq!(summary["unique_principals"], 1);
    assert_eq!(summary["by_action"]["view"], 2);
    assert_eq!(summary["by_action"]["download"], 1);
}

#[tokio::test]
async fn test_role_assignment_audited_once() {
    let app = TestApp::new();
    let (admin, admin_session) = app.login(Role::Admin).await;
    let target = app.principal(Role::Viewer).await;

    let (status, body) = app
        .send(request(
            "PUT",
            &format!("/principals/{}/role", target.id),
            Some(&admin_session),
            Some(json!({ "role": "analyst" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "analyst");

    let (status, entries) = app
        .send(request(
            "GET",
            &format!("/audit?principal_id={}&action=role_assigned", admin.id),
            Some(&admin_session),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0]["details"]
        .as_str()
        .unwrap()
        .contains(&target.id));
}

#[tokio::test]
async fn test_non_admin_cannot_assign_roles() {
    let app = TestApp::new();
    let (analyst, analyst_session) = app.login(Role::Analyst).await;

    let (status, _) = app
        .send(request(
            "PUT",
            &format!("/principals/{}/role", analyst.id),
            Some(&analyst_session),
            Some(json!({ "role": "admin" })),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stored = app.state.rbac.get_principal(&analyst.id).await.unwrap();
    assert_eq!(stored.role, Role::Analyst);
}

#[tokio::test]
async fn test_direct_grant_extends_role() {
    let app = TestApp::new();
    let (_, admin_session) = app.login(Role::Admin).await;
    let (viewer_principal, viewer) = app.login(Role::Viewer).await;

    let check = json!({ "resource_type": "document", "resource_id": "doc-8", "action": "edit" });
    let (status, body) = app
        .send(request("POST", "/permissions/check", Some(&viewer), Some(check.clone())))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);

    let (status, _) = app
        .send(request(
            "POST",
            "/permissions/grants",
            Some(&admin_session),
            Some(json!({
                "principal_id": viewer_principal.id,
                "resource_type": "document",
                "resource_id": "doc-8",
                "action": "edit",
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(request("POST", "/permissions/check", Some(&viewer), Some(check)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    // The grant is scoped to one document.
    let (status, body) = app
        .send(request(
            "POST",
            "/permissions/check",
            Some(&viewer),
            Some(json!({ "resource_type": "document", "resource_id": "doc-9", "action": "edit" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
}
