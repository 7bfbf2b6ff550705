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

async fn register(app: &Router, name: &str, email: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": name, "email": email, "password": "password123" })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "register failed: {body}");
    Ok(body["token"].as_str().context("missing token")?.to_string())
}

async fn create_project(app: &Router, token: &str, name: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/projects",
        Some(token),
        Some(json!({ "name": name, "description": null })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "project create failed: {body}");
    Ok(body["id"].as_str().context("missing project id")?.to_string())
}

async fn create_field(app: &Router, token: &str, definition: Value) -> Result<String> {
    let (status, body) = request(app, "POST", "/fields", Some(token), Some(definition)).await?;
    anyhow::ensure!(status == StatusCode::CREATED, "field create failed: {body}");
    Ok(body["id"].as_str().context("missing field id")?.to_string())
}

#[tokio::test]
async fn every_missing_required_field_is_reported_at_once() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Fields").await?;

    create_field(&app, &token, json!({ "name": "Alpha", "field_type": "text", "required": true })).await?;
    create_field(&app, &token, json!({ "name": "Beta", "field_type": "number", "required": true })).await?;

    let (status, body) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let details = body["details"].as_array().context("missing details")?;
    let reported: Vec<&str> = details.iter().filter_map(Value::as_str).collect();
    assert!(reported.contains(&"alpha"), "alpha missing from {reported:?}");
    assert!(reported.contains(&"beta"), "beta missing from {reported:?}");

    Ok(())
}

#[tokio::test]
async fn number_constraints_reject_out_of_range_and_accept_valid_values() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Budgeted").await?;

    let field_id = create_field(
        &app,
        &token,
        json!({
            "name": "Budget",
            "key": "budget",
            "field_type": "number",
            "required": true,
            "validations": { "min": 0, "max": 1000000 }
        }),
    )
    .await?;

    let (status, body) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": field_id, "value": -5 }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "range violation must fail: {body}");

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": field_id, "value": 500 }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // What was accepted reads back byte-for-byte: no silent coercion.
    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/fields"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let stored = body.as_array().context("expected array")?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["field_key"].as_str(), Some("budget"));
    assert_eq!(stored[0]["value"], json!(500));

    // A non-numeric value is a type violation.
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": field_id, "value": "500" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn dry_run_and_write_make_identical_decisions() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Consistent").await?;

    let field_id = create_field(
        &app,
        &token,
        json!({
            "name": "Code",
            "field_type": "text",
            "required": true,
            "validations": { "min_length": 2, "max_length": 8, "regex": "^[A-Z]+$" }
        }),
    )
    .await?;

    for (value, expected_validate, expected_write) in [
        (json!("x"), StatusCode::UNPROCESSABLE_ENTITY, StatusCode::UNPROCESSABLE_ENTITY),
        (json!("ABC"), StatusCode::OK, StatusCode::OK),
    ] {
        let payload = json!({ "values": [{ "field_id": field_id, "value": value }] });

        let (status, _) = request(&app, "POST", "/fields/validate", Some(&token), Some(payload.clone())).await?;
        assert_eq!(status, expected_validate);

        let (status, _) = request(
            &app,
            "PUT",
            &format!("/projects/{project_id}/fields"),
            Some(&token),
            Some(payload),
        )
        .await?;
        assert_eq!(status, expected_write, "write path must agree with dry-run");
    }

    Ok(())
}

#[tokio::test]
async fn unknown_field_references_are_rejected() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Strict").await?;

    let stray = uuid::Uuid::new_v4();
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": stray, "value": "x" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app,
        "POST",
        "/fields/validate",
        Some(&token),
        Some(json!({ "values": [{ "field_id": stray, "value": "x" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn field_keys_are_normalized_and_unique() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;

    create_field(&app, &token, json!({ "name": "Budget", "key": "  Budget  ", "field_type": "number" })).await?;

    let (status, _) = request(
        &app,
        "POST",
        "/fields",
        Some(&token),
        Some(json!({ "name": "Budget Again", "key": "BUDGET", "field_type": "number" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "normalized keys must collide");

    let (status, body) = request(&app, "GET", "/fields", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body
        .as_array()
        .context("expected array")?
        .iter()
        .filter_map(|f| f["field_key"].as_str())
        .collect();
    assert_eq!(keys, vec!["budget"]);

    Ok(())
}

#[tokio::test]
async fn select_and_multiselect_respect_declared_options() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Optioned").await?;

    let status_field = create_field(
        &app,
        &token,
        json!({ "name": "Status", "field_type": "select", "options": ["open", "closed"] }),
    )
    .await?;
    let tags_field = create_field(
        &app,
        &token,
        json!({ "name": "Tags", "field_type": "multiselect", "options": ["red", "blue"] }),
    )
    .await?;

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": status_field, "value": "archived" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({
            "values": [
                { "field_id": status_field, "value": "open" },
                { "field_id": tags_field, "value": ["red", "blue"] }
            ]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/fields"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let stored = body.as_array().context("expected array")?;
    let tags = stored
        .iter()
        .find(|v| v["field_key"].as_str() == Some("tags"))
        .context("tags value missing")?;
    assert_eq!(tags["value"], json!(["red", "blue"]));

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": tags_field, "value": ["red", "green"] }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn inactive_definitions_accept_no_new_values_and_demand_nothing() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let project_id = create_project(&app, &token, "Retired Fields").await?;

    let field_id = create_field(
        &app,
        &token,
        json!({ "name": "Legacy", "field_type": "text", "required": true }),
    )
    .await?;

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/fields/{field_id}"),
        Some(&token),
        Some(json!({ "active": false })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Deactivated required fields are no longer demanded...
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // ...but they also no longer take values.
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&token),
        Some(json!({ "values": [{ "field_id": field_id, "value": "too late" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn deleting_a_definition_removes_stored_values_everywhere() -> Result<()> {
    let (app, _dir) = setup().await?;
    let token = register(&app, "Admin", "admin@example.com").await?;
    let first = create_project(&app, &token, "First").await?;
    let second = create_project(&app, &token, "Second").await?;

    let field_id = create_field(&app, &token, json!({ "name": "Notes", "field_type": "textarea" })).await?;

    for project_id in [&first, &second] {
        let (status, _) = request(
            &app,
            "PUT",
            &format!("/projects/{project_id}/fields"),
            Some(&token),
            Some(json!({ "values": [{ "field_id": field_id, "value": "keep me" }] })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = request(&app, "DELETE", &format!("/fields/{field_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // No project may hold a dangling field reference afterwards.
    for project_id in [&first, &second] {
        let (status, body) = request(&app, "GET", &format!("/projects/{project_id}/fields"), Some(&token), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(|a| a.len()), Some(0), "dangling value on {project_id}");
    }

    Ok(())
}

#[tokio::test]
async fn editing_field_values_requires_edit_access() -> Result<()> {
    let (app, _dir) = setup().await?;
    let owner_token = register(&app, "Owner", "owner@example.com").await?;
    let viewer_token = register(&app, "Viewer", "viewer@example.com").await?;
    let project_id = create_project(&app, &owner_token, "Guarded Values").await?;

    let field_id = create_field(&app, &owner_token, json!({ "name": "Notes", "field_type": "text" })).await?;

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
        "PUT",
        &format!("/projects/{project_id}/fields"),
        Some(&viewer_token),
        Some(json!({ "values": [{ "field_id": field_id, "value": "nope" }] })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "a viewer must not write field values");

    let (status, _) = request(&app, "GET", &format!("/projects/{project_id}/fields"), Some(&viewer_token), None).await?;
    assert_eq!(status, StatusCode::OK, "a viewer may read field values");

    Ok(())
}
