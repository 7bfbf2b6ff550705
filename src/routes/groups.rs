use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::PermissionEngine;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::group::{
    AddGroupMemberRequest, DbGroup, Group, GroupCreateRequest, GroupDetailResponse, GroupMember,
    GroupUpdateRequest,
};
use crate::models::user::DbUser;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/my-groups",
    tag = "Groups",
    responses((status = 200, description = "Groups owned by or containing the user", body = [Group])),
    security(("bearerAuth" = []))
)]
pub async fn list_my_groups(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Group>>> {
    let engine = PermissionEngine::new(&state.pool);
    let groups = engine.user_groups(auth.user_id).await?;

    let mut result = Vec::with_capacity(groups.len());
    for group in groups {
        let member_count = count_members(&state.pool, group.id).await?;
        result.push(group.into_group(member_count));
    }

    Ok(Json(result))
}

#[utoipa::path(
    post,
    path = "/groups",
    tag = "Groups",
    request_body = GroupCreateRequest,
    responses((status = 201, description = "Group created", body = Group)),
    security(("bearerAuth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    let now = utc_now();
    let group_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO groups (id, name, description, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(group_id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(auth.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let group = fetch_group(&state.pool, group_id).await?.into_group(0);

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &group,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 200, description = "Group with member roster", body = GroupDetailResponse),
        (status = 403, description = "Caller is neither owner nor member")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<GroupDetailResponse>> {
    let group = fetch_group(&state.pool, id).await?;

    let members = fetch_members(&state.pool, group.id).await?;
    let is_member = members.iter().any(|m| m.user_id == auth.user_id);
    if group.owner_id != auth.user_id && !is_member {
        return Err(AppError::forbidden("you do not have access to this group"));
    }

    let member_count = members.len() as i64;
    Ok(Json(GroupDetailResponse {
        group: group.into_group(member_count),
        members,
    }))
}

#[utoipa::path(
    put,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = GroupUpdateRequest,
    responses(
        (status = 200, description = "Group updated", body = Group),
        (status = 403, description = "Caller is not the group owner")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<GroupUpdateRequest>,
) -> AppResult<Json<Group>> {
    let mut group = require_group_owner(&state.pool, id, auth.user_id).await?;

    if let Some(name) = payload.name.as_ref() {
        group.name = name.clone();
    }
    if payload.description.is_some() {
        group.description = payload.description.clone();
    }

    let now = utc_now();
    sqlx::query("UPDATE groups SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&group.name)
        .bind(&group.description)
        .bind(now)
        .bind(group.id)
        .execute(&state.pool)
        .await?;

    group.updated_at = now;
    let member_count = count_members(&state.pool, group.id).await?;
    let group = group.into_group(member_count);

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &group,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(group))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 403, description = "Caller is not the group owner")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let group = require_group_owner(&state.pool, id, auth.user_id).await?;
    let member_count = count_members(&state.pool, group.id).await?;

    // Roster rows and any project grants keyed by this group go with it;
    // a deleted group must not keep granting access.
    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM group_members WHERE group_id = ?")
        .bind(group.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM project_group_permissions WHERE group_id = ?")
        .bind(group.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(group.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let group = group.into_group(member_count);
    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &group,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/groups/{id}/members",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = AddGroupMemberRequest,
    responses(
        (status = 201, description = "Member added", body = GroupMember),
        (status = 400, description = "Unknown email or target is the owner")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddGroupMemberRequest>,
) -> AppResult<(StatusCode, Json<GroupMember>)> {
    let group = require_group_owner(&state.pool, id, auth.user_id).await?;

    let target = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, provider, provider_id, created_at, updated_at, deleted_at FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(payload.email.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::bad_request("no user found with that email"))?;

    // The owner has implicit access and never appears in the roster.
    if target.id == group.owner_id {
        return Err(AppError::bad_request("the group owner is not added as a member"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, added_at, added_by) VALUES (?, ?, ?, ?)",
    )
    .bind(group.id)
    .bind(target.id)
    .bind(utc_now())
    .bind(auth.user_id)
    .execute(&state.pool)
    .await?;

    let member = sqlx::query_as::<_, GroupMember>(
        r#"
        SELECT gm.user_id, u.name, u.email, gm.added_at, gm.added_by
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE gm.group_id = ? AND gm.user_id = ?
        "#,
    )
    .bind(group.id)
    .bind(target.id)
    .fetch_one(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        "added",
        Some(auth.user_id),
        &member,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}/members/{user_id}",
    tag = "Groups",
    params(
        ("id" = Uuid, Path, description = "Group id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 400, description = "No such member")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let group = require_group_owner(&state.pool, id, auth.user_id).await?;

    let member = sqlx::query_as::<_, GroupMember>(
        r#"
        SELECT gm.user_id, u.name, u.email, gm.added_at, gm.added_by
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE gm.group_id = ? AND gm.user_id = ?
        "#,
    )
    .bind(group.id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::bad_request("no such member in this group"))?;

    sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
        .bind(group.id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "removed",
        Some(auth.user_id),
        &member,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_group(pool: &SqlitePool, group_id: Uuid) -> AppResult<DbGroup> {
    sqlx::query_as::<_, DbGroup>(
        "SELECT id, name, description, owner_id, created_at, updated_at FROM groups WHERE id = ?",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("group not found"))
}

async fn require_group_owner(pool: &SqlitePool, group_id: Uuid, user_id: Uuid) -> AppResult<DbGroup> {
    let group = fetch_group(pool, group_id).await?;
    if group.owner_id != user_id {
        return Err(AppError::forbidden("only the group owner can do this"));
    }
    Ok(group)
}

async fn count_members(pool: &SqlitePool, group_id: Uuid) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ?")
        .bind(group_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn fetch_members(pool: &SqlitePool, group_id: Uuid) -> AppResult<Vec<GroupMember>> {
    let members = sqlx::query_as::<_, GroupMember>(
        r#"
        SELECT gm.user_id, u.name, u.email, gm.added_at, gm.added_by
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE gm.group_id = ?
        ORDER BY gm.added_at
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(members)
}
