use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::field::{DbFieldDefinition, FieldDefinition};

const SELECT_COLUMNS: &str = "id, name, field_key, field_type, required, display_order, options, default_value, validations, active, description, created_at, updated_at";

/// Keys are stored trimmed and lowercased; uniqueness is enforced on the
/// normalized form.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Every definition, active or not. The validator resolves supplied field
/// ids against this full set so a known-but-inactive id is distinguishable
/// from an unknown one.
pub async fn load_definitions(pool: &SqlitePool) -> AppResult<Vec<FieldDefinition>> {
    let rows = sqlx::query_as::<_, DbFieldDefinition>(&format!(
        "SELECT {SELECT_COLUMNS} FROM field_definitions ORDER BY display_order, field_key",
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FieldDefinition::try_from).collect()
}

pub async fn load_definition(pool: &SqlitePool, field_id: Uuid) -> AppResult<FieldDefinition> {
    let row = sqlx::query_as::<_, DbFieldDefinition>(&format!(
        "SELECT {SELECT_COLUMNS} FROM field_definitions WHERE id = ?",
    ))
    .bind(field_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("field definition not found"))?;

    row.try_into()
}
