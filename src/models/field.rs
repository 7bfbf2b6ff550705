use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

/// Declared type of a custom field. Values are untyped JSON until the
/// validator checks them against this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Date,
    Select,
    Multiselect,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
        }
    }
}

impl FromStr for FieldType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(FieldType::Text),
            "textarea" => Ok(FieldType::Textarea),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "select" => Ok(FieldType::Select),
            "multiselect" => Ok(FieldType::Multiselect),
            _ => Err(AppError::bad_request(format!("unknown field type '{value}'"))),
        }
    }
}

/// Validation constraints stored on a field definition. Which ones are
/// meaningful depends on the field type: min/max for numbers,
/// min_length/max_length/regex for text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FieldDefinition {
    pub id: Uuid,
    pub name: String,
    /// Stable normalized key (lowercase, trimmed), unique across the registry
    pub field_key: String,
    pub field_type: FieldType,
    pub required: bool,
    pub display_order: i64,
    /// Allowed values; meaningful for select/multiselect only
    pub options: Vec<String>,
    #[schema(value_type = Option<Object>)]
    pub default_value: Option<Value>,
    pub validations: FieldConstraints,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for FieldDefinition {
    fn entity_type() -> &'static str { "field_definition" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbFieldDefinition {
    pub id: Uuid,
    pub name: String,
    pub field_key: String,
    pub field_type: String,
    pub required: bool,
    pub display_order: i64,
    pub options: Option<String>,
    pub default_value: Option<String>,
    pub validations: Option<String>,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbFieldDefinition> for FieldDefinition {
    type Error = AppError;

    fn try_from(value: DbFieldDefinition) -> Result<Self, Self::Error> {
        let options = match value.options.as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|err| AppError::internal(format!("invalid stored options: {err}")))?,
            None => Vec::new(),
        };
        let default_value = match value.default_value.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|err| AppError::internal(format!("invalid stored default: {err}")))?,
            ),
            None => None,
        };
        let validations = match value.validations.as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|err| AppError::internal(format!("invalid stored validations: {err}")))?,
            None => FieldConstraints::default(),
        };

        Ok(FieldDefinition {
            id: value.id,
            name: value.name,
            field_key: value.field_key,
            field_type: FieldType::from_str(&value.field_type)?,
            required: value.required,
            display_order: value.display_order,
            options,
            default_value,
            validations,
            active: value.active,
            description: value.description,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FieldDefinitionCreateRequest {
    #[schema(example = "Budget")]
    pub name: String,
    /// Defaults to the normalized name when omitted
    #[schema(example = "budget")]
    pub key: Option<String>,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    pub display_order: Option<i64>,
    pub options: Option<Vec<String>>,
    #[schema(value_type = Option<Object>)]
    pub default_value: Option<Value>,
    pub validations: Option<FieldConstraints>,
    pub description: Option<String>,
}

/// The key is a stable identifier and cannot change after creation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FieldDefinitionUpdateRequest {
    pub name: Option<String>,
    pub required: Option<bool>,
    pub display_order: Option<i64>,
    pub options: Option<Vec<String>>,
    #[schema(value_type = Option<Object>)]
    pub default_value: Option<Value>,
    pub validations: Option<FieldConstraints>,
    pub active: Option<bool>,
    pub description: Option<String>,
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// A (field, value) pair as submitted by clients; the value is untyped
/// until validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldValueInput {
    pub field_id: Uuid,
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WriteFieldValuesRequest {
    pub values: Vec<FieldValueInput>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectFieldValue {
    pub field_id: Uuid,
    pub field_key: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProjectFieldValue {
    pub field_id: Uuid,
    pub field_key: String,
    pub name: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbProjectFieldValue> for ProjectFieldValue {
    type Error = AppError;

    fn try_from(value: DbProjectFieldValue) -> Result<Self, Self::Error> {
        let parsed = serde_json::from_str(&value.value)
            .map_err(|err| AppError::internal(format!("invalid stored field value: {err}")))?;

        Ok(ProjectFieldValue {
            field_id: value.field_id,
            field_key: value.field_key,
            name: value.name,
            value: parsed,
            updated_at: value.updated_at,
        })
    }
}
