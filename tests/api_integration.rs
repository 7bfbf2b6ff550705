use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt; // for `oneshot`

use planboard::create_app;

async fn send(
    app: &axum::Router,
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

    let resp: Response = app.clone().oneshot(request).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn full_api_flow() -> Result<()> {
    // create temp dir and sqlite db
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    // run migrations from crate migrations folder
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    // -- register the project owner and a collaborator
    let (status, owner_res) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Owner", "email": "owner@example.com", "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {owner_res}");
    let owner_token = owner_res["token"].as_str().context("missing token")?.to_string();

    let (status, collab_res) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Collaborator", "email": "collab@example.com", "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let collab_token = collab_res["token"].as_str().context("missing token")?.to_string();

    let (status, third_res) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Teammate", "email": "teammate@example.com", "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let teammate_token = third_res["token"].as_str().context("missing token")?.to_string();

    // -- create a project
    let (status, project_res) = send(
        &app,
        "POST",
        "/projects",
        Some(&owner_token),
        Some(json!({ "name": "Shared Project", "description": "desc" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "project create failed: {project_res}");
    let project_id = project_res["id"].as_str().context("missing project id")?.to_string();
    assert_eq!(project_res["visibility"].as_str(), Some("private"));

    // -- share it with the collaborator as editor
    let (status, shared) = send(
        &app,
        "POST",
        &format!("/projects/{project_id}/permissions"),
        Some(&owner_token),
        Some(json!({ "email": "collab@example.com", "role": "editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "grant failed: {shared}");

    // -- the collaborator can edit the project content
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&collab_token),
        Some(json!({ "description": "updated by collaborator" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // -- define a custom field and store a validated value
    let (status, field_res) = send(
        &app,
        "POST",
        "/fields",
        Some(&owner_token),
        Some(json!({
            "name": "Budget",
            "key": "budget",
            "field_type": "number",
            "required": true,
            "validations": { "min": 0, "max": 1000000 }
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "field create failed: {field_res}");
    let field_id = field_res["id"].as_str().context("missing field id")?.to_string();

    let (status, values_res) = send(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&collab_token),
        Some(json!({ "values": [{ "field_id": field_id, "value": 500 }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "field value write failed: {values_res}");
    assert_eq!(values_res[0]["value"], json!(500));

    // -- group-based sharing for the teammate
    let (status, group_res) = send(
        &app,
        "POST",
        "/groups",
        Some(&owner_token),
        Some(json!({ "name": "Observers", "description": "read-only crowd" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group_res["id"].as_str().context("missing group id")?.to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/groups/{group_id}/members"),
        Some(&owner_token),
        Some(json!({ "email": "teammate@example.com" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/projects/{project_id}/group-permissions"),
        Some(&owner_token),
        Some(json!({ "group_id": group_id, "role": "viewer" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // the teammate can read the project and its field values, nothing more
    let (status, _) = send(&app, "GET", &format!("/projects/{project_id}"), Some(&teammate_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, read_values) = send(
        &app,
        "GET",
        &format!("/projects/{project_id}/fields"),
        Some(&teammate_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read_values[0]["field_key"].as_str(), Some("budget"));
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/projects/{project_id}"),
        Some(&teammate_token),
        Some(json!({ "name": "nope" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // -- the sharing views line up
    let (status, users) = send(&app, "GET", &format!("/projects/{project_id}/users"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["owner"]["email"].as_str(), Some("owner@example.com"));
    assert_eq!(users["collaborators"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(users["collaborators"][0]["role"].as_str(), Some("editor"));

    let (status, groups) = send(&app, "GET", &format!("/projects/{project_id}/groups"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups["groups"].as_array().map(|a| a.len()), Some(1));

    // -- owner-only delete at the end of the lifecycle
    let (status, _) = send(&app, "DELETE", &format!("/projects/{project_id}"), Some(&collab_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "DELETE", &format!("/projects/{project_id}"), Some(&owner_token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", &format!("/projects/{project_id}"), Some(&collab_token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "soft-deleted project must be gone");

    Ok(())
}
