use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{PermissionEngine, Visibility};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::fields;
use crate::jwt::AuthUser;
use crate::models::field::{DbProjectFieldValue, ProjectFieldValue, WriteFieldValuesRequest};
use crate::models::project::{DbProject, Project, ProjectCreateRequest, ProjectUpdateRequest};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects the user owns or has been granted", body = [Project])),
    security(("bearerAuth" = []))
)]
pub async fn list_projects(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Project>>> {
    // Owned, directly granted, or granted through a group the user owns or
    // belongs to. Public projects are reachable by id but not listed here.
    let projects = sqlx::query_as::<_, DbProject>(
        r#"
        SELECT DISTINCT p.id, p.owner_id, p.name, p.description, p.visibility, p.created_at, p.updated_at, p.deleted_at
        FROM projects p
        LEFT JOIN project_permissions pp ON pp.project_id = p.id AND pp.user_id = ?
        LEFT JOIN project_group_permissions pgp ON pgp.project_id = p.id
        LEFT JOIN groups g ON g.id = pgp.group_id
        LEFT JOIN group_members gm ON gm.group_id = g.id AND gm.user_id = ?
        WHERE p.deleted_at IS NULL
          AND (p.owner_id = ?
               OR pp.user_id IS NOT NULL
               OR (pgp.group_id IS NOT NULL AND (g.owner_id = ? OR gm.user_id IS NOT NULL)))
        ORDER BY p.created_at DESC
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.user_id)
    .bind(auth.user_id)
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    let projects: Vec<Project> = projects
        .into_iter()
        .map(Project::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses((status = 201, description = "Project created", body = Project)),
    security(("bearerAuth" = []))
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let now = utc_now();
    let project_id = Uuid::new_v4();
    let visibility = payload.visibility.unwrap_or(Visibility::Private);

    sqlx::query(
        "INSERT INTO projects (id, owner_id, name, description, visibility, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(auth.user_id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(visibility.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let engine = PermissionEngine::new(&state.pool);
    let project: Project = engine.fetch_project(project_id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &project,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project detail", body = Project)),
    security(("bearerAuth" = []))
)]
pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let project: Project = engine.require_access(id, auth.user_id).await?.try_into()?;
    Ok(Json(project))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project updated", body = Project)),
    security(("bearerAuth" = []))
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let mut project = engine.require_edit(id, auth.user_id).await?;
    let old: Project = project.clone().try_into()?;

    if let Some(name) = payload.name.as_ref() {
        project.name = name.clone();
    }
    if payload.description.is_some() {
        project.description = payload.description.clone();
    }

    let now = utc_now();

    sqlx::query("UPDATE projects SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&project.name)
        .bind(&project.description)
        .bind(now)
        .bind(project.id)
        .execute(&state.pool)
        .await?;

    project.updated_at = now;
    let project: Project = project.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &project,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project soft deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_owner(id, auth.user_id).await?;

    let now = utc_now();
    let affected = sqlx::query("UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(project.id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("project not found"));
    }

    let project: Project = project.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &project,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// CUSTOM FIELD VALUES
// =============================================================================

#[utoipa::path(
    get,
    path = "/projects/{id}/fields",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Custom field values", body = [ProjectFieldValue])),
    security(("bearerAuth" = []))
)]
pub async fn get_field_values(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectFieldValue>>> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_access(id, auth.user_id).await?;

    let values = fetch_field_values(&state.pool, project.id).await?;
    Ok(Json(values))
}

#[utoipa::path(
    put,
    path = "/projects/{id}/fields",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = WriteFieldValuesRequest,
    responses(
        (status = 200, description = "Validated and stored field values", body = [ProjectFieldValue]),
        (status = 422, description = "Validation failed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn put_field_values(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<WriteFieldValuesRequest>,
) -> AppResult<Json<Vec<ProjectFieldValue>>> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_edit(id, auth.user_id).await?;

    let definitions = fields::load_definitions(&state.pool).await?;
    let normalized = fields::validate_values(&definitions, &payload.values)?;

    // Values may only be stored against active definitions; the validator
    // already guaranteed every id resolves to a known one.
    for pair in &normalized {
        let active = definitions
            .iter()
            .find(|def| def.id == pair.field_id)
            .map(|def| def.active)
            .unwrap_or(false);
        if !active {
            return Err(AppError::bad_request("cannot store a value for an inactive field"));
        }
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;
    for pair in &normalized {
        if pair.value.is_null() {
            sqlx::query("DELETE FROM project_field_values WHERE project_id = ? AND field_id = ?")
                .bind(project.id)
                .bind(pair.field_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO project_field_values (project_id, field_id, value, updated_at, updated_by)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(project_id, field_id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at, updated_by = excluded.updated_by
                "#,
            )
            .bind(project.id)
            .bind(pair.field_id)
            .bind(pair.value.to_string())
            .bind(now)
            .bind(auth.user_id)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    let values = fetch_field_values(&state.pool, project.id).await?;
    Ok(Json(values))
}

async fn fetch_field_values(pool: &SqlitePool, project_id: Uuid) -> AppResult<Vec<ProjectFieldValue>> {
    let rows = sqlx::query_as::<_, DbProjectFieldValue>(
        r#"
        SELECT pfv.field_id, fd.field_key, fd.name, pfv.value, pfv.updated_at
        FROM project_field_values pfv
        JOIN field_definitions fd ON fd.id = pfv.field_id
        WHERE pfv.project_id = ?
        ORDER BY fd.display_order, fd.field_key
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ProjectFieldValue::try_from).collect()
}
