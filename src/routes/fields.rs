//! Field definition admin endpoints. Definitions are registry-wide: keys
//! are normalized and unique, and deleting a definition removes every
//! stored project value referencing it in the same transaction.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::fields::{self, normalize_key};
use crate::jwt::AuthUser;
use crate::models::field::{
    FieldDefinition, FieldDefinitionCreateRequest, FieldDefinitionUpdateRequest, FieldValueInput,
    WriteFieldValuesRequest,
};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/fields",
    tag = "Fields",
    responses((status = 200, description = "All field definitions", body = [FieldDefinition])),
    security(("bearerAuth" = []))
)]
pub async fn list_fields(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<FieldDefinition>>> {
    let definitions = fields::load_definitions(&state.pool).await?;
    Ok(Json(definitions))
}

#[utoipa::path(
    post,
    path = "/fields",
    tag = "Fields",
    request_body = FieldDefinitionCreateRequest,
    responses(
        (status = 201, description = "Field definition created", body = FieldDefinition),
        (status = 409, description = "A field with that key already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_field(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<FieldDefinitionCreateRequest>,
) -> AppResult<(StatusCode, Json<FieldDefinition>)> {
    let field_key = normalize_key(payload.key.as_deref().unwrap_or(&payload.name));
    if field_key.is_empty() {
        return Err(AppError::bad_request("field key must not be empty"));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM field_definitions WHERE field_key = ?")
        .bind(&field_key)
        .fetch_one(&state.pool)
        .await?;
    if existing > 0 {
        return Err(AppError::conflict("a field with that key already exists"));
    }

    let now = utc_now();
    let definition = FieldDefinition {
        id: Uuid::new_v4(),
        name: payload.name,
        field_key,
        field_type: payload.field_type,
        required: payload.required,
        display_order: payload.display_order.unwrap_or(0),
        options: payload.options.unwrap_or_default(),
        default_value: payload.default_value,
        validations: payload.validations.unwrap_or_default(),
        active: true,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };

    // A default must satisfy the definition it belongs to.
    if let Some(default) = definition.default_value.clone() {
        let pair = FieldValueInput {
            field_id: definition.id,
            value: default,
        };
        fields::validate_values(std::slice::from_ref(&definition), &[pair])
            .map_err(|_| AppError::bad_request("default value does not satisfy the field definition"))?;
    }

    insert_definition(&state.pool, &definition).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &definition,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(definition)))
}

#[utoipa::path(
    get,
    path = "/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field definition id")),
    responses(
        (status = 200, description = "Field definition", body = FieldDefinition),
        (status = 404, description = "Field definition not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_field(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FieldDefinition>> {
    let definition = fields::load_definition(&state.pool, id).await?;
    Ok(Json(definition))
}

#[utoipa::path(
    put,
    path = "/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field definition id")),
    request_body = FieldDefinitionUpdateRequest,
    responses(
        (status = 200, description = "Field definition updated", body = FieldDefinition),
        (status = 404, description = "Field definition not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_field(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<FieldDefinitionUpdateRequest>,
) -> AppResult<Json<FieldDefinition>> {
    let mut definition = fields::load_definition(&state.pool, id).await?;
    let old = definition.clone();

    if let Some(name) = payload.name {
        definition.name = name;
    }
    if let Some(required) = payload.required {
        definition.required = required;
    }
    if let Some(display_order) = payload.display_order {
        definition.display_order = display_order;
    }
    if let Some(options) = payload.options {
        definition.options = options;
    }
    if payload.default_value.is_some() {
        definition.default_value = payload.default_value;
    }
    if let Some(validations) = payload.validations {
        definition.validations = validations;
    }
    if let Some(active) = payload.active {
        definition.active = active;
    }
    if payload.description.is_some() {
        definition.description = payload.description;
    }
    definition.updated_at = utc_now();

    sqlx::query(
        r#"
        UPDATE field_definitions
        SET name = ?, required = ?, display_order = ?, options = ?, default_value = ?, validations = ?, active = ?, description = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&definition.name)
    .bind(definition.required)
    .bind(definition.display_order)
    .bind(serde_json::to_string(&definition.options).unwrap_or_default())
    .bind(definition.default_value.as_ref().map(|v| v.to_string()))
    .bind(serde_json::to_string(&definition.validations).unwrap_or_default())
    .bind(definition.active)
    .bind(&definition.description)
    .bind(definition.updated_at)
    .bind(definition.id)
    .execute(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &definition,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(definition))
}

#[utoipa::path(
    delete,
    path = "/fields/{id}",
    tag = "Fields",
    params(("id" = Uuid, Path, description = "Field definition id")),
    responses(
        (status = 204, description = "Field definition and all stored values deleted"),
        (status = 404, description = "Field definition not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_field(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let definition = fields::load_definition(&state.pool, id).await?;

    // Stored values must never reference a missing definition, so both
    // deletes commit together.
    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM project_field_values WHERE field_id = ?")
        .bind(definition.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM field_definitions WHERE id = ?")
        .bind(definition.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &definition,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/fields/validate",
    tag = "Fields",
    request_body = WriteFieldValuesRequest,
    responses(
        (status = 200, description = "Values are valid; normalized pairs returned", body = [FieldValueInput]),
        (status = 422, description = "Validation failed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn validate_field_values(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<WriteFieldValuesRequest>,
) -> AppResult<Json<Vec<FieldValueInput>>> {
    let definitions = fields::load_definitions(&state.pool).await?;
    let normalized = fields::validate_values(&definitions, &payload.values)?;
    Ok(Json(normalized))
}

async fn insert_definition(pool: &sqlx::SqlitePool, definition: &FieldDefinition) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO field_definitions (id, name, field_key, field_type, required, display_order, options, default_value, validations, active, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(definition.id)
    .bind(&definition.name)
    .bind(&definition.field_key)
    .bind(definition.field_type.as_str())
    .bind(definition.required)
    .bind(definition.display_order)
    .bind(serde_json::to_string(&definition.options).unwrap_or_default())
    .bind(definition.default_value.as_ref().map(|v| v.to_string()))
    .bind(serde_json::to_string(&definition.validations).unwrap_or_default())
    .bind(definition.active)
    .bind(&definition.description)
    .bind(definition.created_at)
    .bind(definition.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}
