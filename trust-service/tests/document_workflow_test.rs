mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{request, TestApp};
use serde_json::json;
use std::collections::HashSet;
use trust_service::models::{LockType, Role};
use trust_service::services::{Actor, ServiceError, VersionDraft};

fn draft(body: &str) -> VersionDraft {
    VersionDraft {
        title: "Purchase agreement".to_string(),
        content_type: "text/plain".to_string(),
        content: body.as_bytes().to_vec(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lock_has_one_winner() {
    let app = TestApp::new();

    let mut handles = Vec::new();
    for who in ["analyst-1", "analyst-2"] {
        let versions = app.state.versions.clone();
        handles.push(tokio::spawn(async move {
            versions
                .acquire_lock(&Actor::new(who), "doc-42", LockType::Edit, None, None)
                .await
        }));
    }

    let mut acquired = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => acquired += 1,
            Err(ServiceError::AlreadyLocked { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(acquired, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn test_lock_conflict_over_http() {
    let app = TestApp::new();
    let (holder, holder_session) = app.login(Role::Analyst).await;
    let (_, other_session) = app.login(Role::Analyst).await;

    let (status, body) = app
        .send(request(
            "PUT",
            "/documents/doc-7/lock",
            Some(&holder_session),
            Some(json!({ "lock_type": "edit", "ttl_minutes": 30 })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["holder_id"], holder.id);

    let (status, body) = app
        .send(request(
            "PUT",
            "/documents/doc-7/lock",
            Some(&other_session),
            Some(json!({ "lock_type": "edit" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains(&holder.id));
    assert!(message.contains("UTC"));

    // Only the holder may release without force.
    let (status, _) = app
        .send(request("DELETE", "/documents/doc-7/lock", Some(&other_session), None))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .send(request("DELETE", "/documents/doc-7/lock", Some(&holder_session), None))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_lock_expires_after_ttl() {
    let app = TestApp::new();
    let alice = Actor::new("analyst-1");
    let bob = Actor::new("analyst-2");

    app.state
        .versions
        .acquire_lock(&alice, "doc-1", LockType::Edit, Some(Duration::minutes(30)), None)
        .await
        .unwrap();

    app.clock.advance(Duration::minutes(29));
    assert!(matches!(
        app.state
            .versions
            .acquire_lock(&bob, "doc-1", LockType::Edit, None, None)
            .await,
        Err(ServiceError::AlreadyLocked { .. })
    ));

    app.clock.advance(Duration::minutes(2));
    let lock = app
        .state
        .versions
        .acquire_lock(&bob, "doc-1", LockType::Edit, None, None)
        .await
        .unwrap();
    assert_eq!(lock.holder_id, "analyst-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_versions_are_numbered_uniquely() {
    let app = TestApp::new();
    let author = Actor::new("analyst-1");
    app.state
        .versions
        .acquire_lock(&author, "doc-9", LockType::Edit, None, None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let versions = app.state.versions.clone();
        let author = author.clone();
        handles.push(tokio::spawn(async move {
            versions
                .create_version(&author, "doc-9", draft(&format!("revision {}", i)))
                .await
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        let version = handle.await.unwrap().unwrap();
        assert!(numbers.insert(version.version_number));
    }
    assert_eq!(numbers, (1..=10).collect::<HashSet<u32>>());

    let listed = app.state.versions.list_versions("doc-9").await.unwrap();
    assert_eq!(listed.len(), 10);
    // Every version after the first points at its predecessor.
    for version in &listed {
        if version.version_number == 1 {
            assert!(version.parent_version_id.is_none());
        } else {
            let parent = listed
                .iter()
                .find(|v| Some(&v.id) == version.parent_version_id.as_ref())
                .unwrap();
            assert_eq!(parent.version_number, version.version_number - 1);
        }
    }
}

#[tokio::test]
async fn test_version_workflow_over_http() {
    let app = TestApp::new();
    let (analyst, analyst_session) = app.login(Role::Analyst).await;
    let (_, reviewer_session) = app.login(Role::Reviewer).await;

    // Creating without the lock is refused.
    let (status, _) = app
        .send(request(
            "POST",
            "/documents/doc-3/versions",
            Some(&analyst_session),
            Some(json!({ "title": "Draft memo", "content": "Initial terms" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(request(
            "PUT",
            "/documents/doc-3/lock",
            Some(&analyst_session),
            Some(json!({ "lock_type": "edit" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, version) = app
        .send(request(
            "POST",
            "/documents/doc-3/versions",
            Some(&analyst_session),
            Some(json!({ "title": "Draft memo", "content": "Initial terms" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(version["version_number"], 1);
    assert_eq!(version["status"], "draft");
    assert_eq!(version["created_by"], analyst.id);
    let version_id = version["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(request(
            "GET",
            &format!("/documents/doc-3/versions/{}/content", version_id),
            Some(&reviewer_session),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "Initial terms");

    // Analysts cannot approve.
    let (status, _) = app
        .send(request(
            "POST",
            &format!("/documents/doc-3/versions/{}/approve", version_id),
            Some(&analyst_session),
            Some(json!({})),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(request(
            "POST",
            &format!("/documents/doc-3/versions/{}/submit", version_id),
            Some(&analyst_session),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(request(
            "POST",
            &format!("/documents/doc-3/versions/{}/approve", version_id),
            Some(&reviewer_session),
            Some(json!({ "comments": "Looks right" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    // Approval cannot be repeated.
    let (status, _) = app
        .send(request(
            "POST",
            &format!("/documents/doc-3/versions/{}/approve", version_id),
            Some(&reviewer_session),
            Some(json!({})),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_approve_twice_fails() {
    let app = TestApp::new();
    let author = Actor::new("analyst-1");
    let reviewer = Actor::new("reviewer-1");
    app.state
        .versions
        .acquire_lock(&author, "doc-5", LockType::Edit, None, None)
        .await
        .unwrap();
    let version = app
        .state
        .versions
        .create_version(&author, "doc-5", draft("v1"))
        .await
        .unwrap();

    app.state
        .versions
        .approve_version(&reviewer, "doc-5", &version.id, None)
        .await
        .unwrap();
    assert!(matches!(
        app.state
            .versions
            .approve_version(&reviewer, "doc-5", &version.id, None)
            .await,
        Err(ServiceError::AlreadyApproved)
    ));
}

#[tokio::test]
async fn test_sweeper_clears_expired_state() {
    let app = TestApp::new();
    let (_, session) = app.login(Role::Viewer).await;
    app.state
        .versions
        .acquire_lock(
            &Actor::new("analyst-1"),
            "doc-1",
            LockType::Edit,
            Some(Duration::minutes(30)),
            None,
        )
        .await
        .unwrap();

    let sweeper = app.state.sweeper();
    let report = sweeper.run_once().await;
    assert_eq!(report.sessions, 0);
    assert_eq!(report.locks, 0);

    app.clock.advance(Duration::hours(25));
    let report = sweeper.run_once().await;
    assert_eq!(report.sessions, 1);
    assert_eq!(report.locks, 1);
    assert!(matches!(
        app.state
            .sessions
            .validate_session(&session.id, &session.device_fingerprint)
            .await,
        Err(ServiceError::SessionNotFound)
    ));
    assert!(app.state.versions.get_lock("doc-1").await.unwrap().is_none());
}
