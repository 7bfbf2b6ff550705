use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use planboard::create_app;

async fn setup() -> Result<(Router, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool).await?;
    Ok((app, dir))
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    payload: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match payload {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(request).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

/// Registers a user and returns (token, user id).
async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": name, "email": email, "password": "password123" })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "register failed: {body}");

    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = body["user"]["id"].as_str().context("missing user id")?.to_string();
    Ok((token, user_id))
}

async fn create_project(app: &Router, token: &str, name: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/projects",
        Some(token),
        Some(json!({ "name": name, "description": "shared work" })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "project create failed: {body}");
    Ok(body["id"].as_str().context("missing project id")?.to_string())
}

#[tokio::test]
async fn grant_then_revoke_controls_access() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (editor_token, editor_id) = register(&app, "Editor", "editor@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Private Project").await?;

    // Before any grant the second user sees nothing.
    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "editor@example.com", "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // An editor grant allows both viewing and editing.
    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&editor_token),
        Some(json!({ "name": "Renamed by editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/projects/{project_id}/permissions/{editor_id}"),
        Some(&owner_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // After revocation access is gone entirely.
    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request(&app, "GET", "/projects", Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(|a| a.len()), Some(0));

    Ok(())
}

#[tokio::test]
async fn owner_keeps_full_access_regardless_of_grants() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, owner_id) = register(&app, "Owner", "owner@example.com").await?;
    let (_, viewer_id) = register(&app, "Viewer", "viewer@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Mine").await?;

    for visibility in ["public", "team", "private"] {
        let (status, _) = request(
            &app,
            "PUT",
            &format!("/projects/{project_id}/visibility"),
            Some(&owner_token),
            Some(json!({ "visibility": visibility })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&owner_token), None).await?;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = request(
            &app,
            "PUT",
            &format!("/projects/{project_id}"),
            Some(&owner_token),
            Some(json!({ "description": format!("now {visibility}") })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
    }

    // Grant churn by the owner never touches the owner's own standing.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "viewer@example.com", "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/projects/{project_id}/permissions/{viewer_id}"),
        Some(&owner_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/users"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"]["id"].as_str(), Some(owner_id.as_str()));

    Ok(())
}

#[tokio::test]
async fn owner_cannot_be_granted_permissions() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let project_id = create_project(&app, &owner_token, "Self Grant").await?;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "owner@example.com", "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "self-grant must be rejected: {body}");

    Ok(())
}

#[tokio::test]
async fn regranting_updates_the_existing_grant_in_place() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (_, _) = register(&app, "Grace", "grace@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Idempotent").await?;

    for role in ["viewer", "viewer", "editor"] {
        let (status, _) = request(
            &app,
            "POST",
            &format!("/projects/{project_id}/permissions"),
            Some(&owner_token),
            Some(json!({ "email": "grace@example.com", "role": role })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/users"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let collaborators = body["collaborators"].as_array().context("missing collaborators")?;
    assert_eq!(collaborators.len(), 1, "re-granting must not duplicate: {body}");
    assert_eq!(collaborators[0]["role"].as_str(), Some("editor"));

    Ok(())
}

#[tokio::test]
async fn public_visibility_opens_view_but_never_edit() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (stranger_token, _) = register(&app, "Stranger", "stranger@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Going Public").await?;

    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&stranger_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/visibility"),
        Some(&owner_token),
        Some(json!({ "visibility": "public" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}"), Some(&stranger_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&stranger_token),
        Some(json!({ "name": "Hijacked" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "public visibility must not grant edit");

    // Visibility is not a role: the stranger can look but holds nothing.
    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/my-role"), Some(&stranger_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["role"].is_null());

    Ok(())
}

#[tokio::test]
async fn effective_role_is_the_maximum_across_paths() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (member_token, _) = register(&app, "Member", "member@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Layered").await?;

    // Direct viewer grant alone: no edit.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "member@example.com", "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&member_token),
        Some(json!({ "name": "Viewer edit attempt" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // An editor-level group grant on top lifts the effective role.
    let (status, body) = request(
        &app,
        "POST",
        "/groups",
        Some(&owner_token),
        Some(json!({ "name": "Editors", "description": null })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = body["id"].as_str().context("missing group id")?.to_string();

    let (status, _) = request(
        &app,
        "POST",
        &format!("/groups/{group_id}/members"),
        Some(&owner_token),
        Some(json!({ "email": "member@example.com" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/group-permissions"),
        Some(&owner_token),
        Some(json!({ "group_id": group_id, "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&member_token),
        Some(json!({ "name": "Edited through group" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "max-of-paths must allow the edit");

    // The single-role query agrees with the edit decision.
    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/my-role"), Some(&member_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"].as_str(), Some("editor"));

    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/my-role"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"].as_str(), Some("owner"));

    Ok(())
}

#[tokio::test]
async fn only_the_owner_manages_permissions_and_visibility() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (editor_token, _) = register(&app, "Editor", "editor@example.com").await?;
    let (_, third_id) = register(&app, "Third", "third@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Locked Down").await?;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "editor@example.com", "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Edit rights are not enough for role escalation.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&editor_token),
        Some(json!({ "email": "third@example.com", "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/projects/{project_id}/permissions/{third_id}"),
        Some(&editor_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/visibility"),
        Some(&editor_token),
        Some(json!({ "visibility": "public" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn mutations_on_absent_grants_and_projects_fail_cleanly() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (_, other_id) = register(&app, "Other", "other@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Edges").await?;

    // Updating or revoking a grant that does not exist is a bad request.
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/permissions/{other_id}"),
        Some(&owner_token),
        Some(json!({ "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/projects/{project_id}/permissions/{other_id}"),
        Some(&owner_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Granting to an unknown email is a bad request.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "ghost@example.com", "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A missing project is NotFound, a missing group on grant likewise.
    let missing = uuid::Uuid::new_v4();
    let (status, _) = request(&app, "GET", &format!("/projects/{missing}"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/group-permissions"),
        Some(&owner_token),
        Some(json!({ "group_id": missing, "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn shared_projects_appear_in_the_grantees_listing() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (owner_token, _) = register(&app, "Owner", "owner@example.com").await?;
    let (viewer_token, _) = register(&app, "Viewer", "viewer@example.com").await?;

    let project_id = create_project(&app, &owner_token, "Listed").await?;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "viewer@example.com", "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "GET", "/projects", Some(&viewer_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<&str> = body
        .as_array()
        .context("expected array")?
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert_eq!(listed, vec![project_id.as_str()]);

    Ok(())
}
