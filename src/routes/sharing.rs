//! Sharing endpoints: direct and group permission grants plus project
//! visibility. Every mutation is owner-gated by the permission engine and
//! logged with Critical severity.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::PermissionEngine;
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::project::{
    ChangeVisibilityRequest, GrantGroupPermissionRequest, GrantPermissionRequest,
    GroupPermissionGrant, MyRoleResponse, PermissionGrant, Project, ProjectGroupsResponse,
    ProjectUsersResponse, UpdatePermissionRequest,
};

#[utoipa::path(
    get,
    path = "/projects/{id}/users",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Owner and collaborators", body = ProjectUsersResponse)),
    security(("bearerAuth" = []))
)]
pub async fn get_project_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProjectUsersResponse>> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_access(id, auth.user_id).await?;

    let (owner, collaborators) = engine.project_users(&project).await?;
    let collaborators = collaborators
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(ProjectUsersResponse { owner, collaborators }))
}

#[utoipa::path(
    get,
    path = "/projects/{id}/groups",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Groups granted on the project", body = ProjectGroupsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn get_project_groups(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProjectGroupsResponse>> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_access(id, auth.user_id).await?;

    let groups = engine
        .project_groups(&project)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(ProjectGroupsResponse { groups }))
}

#[utoipa::path(
    get,
    path = "/projects/{id}/my-role",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "The requester's effective role", body = MyRoleResponse)),
    security(("bearerAuth" = []))
)]
pub async fn get_my_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MyRoleResponse>> {
    let engine = PermissionEngine::new(&state.pool);
    let project = engine.require_access(id, auth.user_id).await?;

    let role = engine.effective_role(&project, auth.user_id).await?;
    Ok(Json(MyRoleResponse { role }))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/permissions",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = GrantPermissionRequest,
    responses(
        (status = 200, description = "Permission granted", body = Project),
        (status = 400, description = "Unknown email or self-grant"),
        (status = 403, description = "Caller is not the owner")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<GrantPermissionRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine
        .grant_user(id, auth.user_id, &payload.email, payload.role)
        .await?;

    let grant: PermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    put,
    path = "/projects/{id}/permissions/{user_id}",
    tag = "Sharing",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Granted user id")
    ),
    request_body = UpdatePermissionRequest,
    responses(
        (status = 200, description = "Role updated", body = Project),
        (status = 400, description = "No grant exists for the user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdatePermissionRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine
        .update_user_role(id, auth.user_id, user_id, payload.role)
        .await?;

    let grant: PermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/permissions/{user_id}",
    tag = "Sharing",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Granted user id")
    ),
    responses(
        (status = 200, description = "Permission revoked", body = Project),
        (status = 400, description = "No grant exists for the user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine.revoke_user(id, auth.user_id, user_id).await?;

    let grant: PermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/group-permissions",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = GrantGroupPermissionRequest,
    responses(
        (status = 200, description = "Group permission granted", body = Project),
        (status = 404, description = "Group not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_group_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<GrantGroupPermissionRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine
        .grant_group(id, auth.user_id, payload.group_id, payload.role)
        .await?;

    let grant: GroupPermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    put,
    path = "/projects/{id}/group-permissions/{group_id}",
    tag = "Sharing",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("group_id" = Uuid, Path, description = "Granted group id")
    ),
    request_body = UpdatePermissionRequest,
    responses(
        (status = 200, description = "Group role updated", body = Project),
        (status = 400, description = "No grant exists for the group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_group_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, group_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdatePermissionRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine
        .update_group_role(id, auth.user_id, group_id, payload.role)
        .await?;

    let grant: GroupPermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/group-permissions/{group_id}",
    tag = "Sharing",
    params(
        ("id" = Uuid, Path, description = "Project id"),
        ("group_id" = Uuid, Path, description = "Granted group id")
    ),
    responses(
        (status = 200, description = "Group permission revoked", body = Project),
        (status = 400, description = "No grant exists for the group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_group_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, group_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let (project, grant) = engine.revoke_group(id, auth.user_id, group_id).await?;

    let grant: GroupPermissionGrant = grant.try_into()?;
    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project.try_into()?))
}

#[utoipa::path(
    put,
    path = "/projects/{id}/visibility",
    tag = "Sharing",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ChangeVisibilityRequest,
    responses(
        (status = 200, description = "Visibility changed", body = Project),
        (status = 403, description = "Caller is not the owner")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_visibility(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeVisibilityRequest>,
) -> AppResult<Json<Project>> {
    let engine = PermissionEngine::new(&state.pool);
    let project: Project = engine
        .change_visibility(id, auth.user_id, payload.visibility)
        .await?
        .try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "visibility_changed",
        Some(auth.user_id),
        &project,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(project))
}
