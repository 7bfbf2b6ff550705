use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::field::{FieldDefinition, FieldType, FieldValueInput};

/// Validate a set of (field, value) pairs against the definitions snapshot.
///
/// Two passes:
/// 1. every active required definition must have a non-null, non-empty
///    value; all missing keys are reported together in one error.
/// 2. each supplied pair is resolved and type-checked; all violations are
///    collected and reported together. An unknown field id fails
///    immediately as a bad request.
///
/// Values are never coerced: the returned pairs carry the canonical field
/// id and the value exactly as supplied. The dry-run endpoint and the
/// write path both go through here, so their accept/reject decisions are
/// identical.
pub fn validate_values(
    definitions: &[FieldDefinition],
    inputs: &[FieldValueInput],
) -> AppResult<Vec<FieldValueInput>> {
    let by_id: HashMap<Uuid, &FieldDefinition> =
        definitions.iter().map(|def| (def.id, def)).collect();

    let mut missing = Vec::new();
    for def in definitions.iter().filter(|d| d.active && d.required) {
        let supplied = inputs
            .iter()
            .find(|pair| pair.field_id == def.id)
            .map(|pair| &pair.value);
        if !supplied.map(has_content).unwrap_or(false) {
            missing.push(def.field_key.clone());
        }
    }
    if !missing.is_empty() {
        return Err(AppError::validation("missing required fields", missing));
    }

    let mut violations = Vec::new();
    let mut normalized = Vec::with_capacity(inputs.len());
    for pair in inputs {
        let def = by_id
            .get(&pair.field_id)
            .ok_or_else(|| AppError::bad_request("invalid field"))?;

        // Absence is only an error for required fields, handled above.
        if !pair.value.is_null() {
            if let Err(violation) = check_value(def, &pair.value) {
                violations.push(violation);
            }
        }

        normalized.push(FieldValueInput {
            field_id: def.id,
            value: pair.value.clone(),
        });
    }
    if !violations.is_empty() {
        return Err(AppError::validation("invalid field values", violations));
    }

    Ok(normalized)
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn check_value(def: &FieldDefinition, value: &Value) -> Result<(), String> {
    let key = &def.field_key;
    match def.field_type {
        FieldType::Text | FieldType::Textarea => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("field '{key}' must be a string"))?;
            let length = text.chars().count();
            if let Some(min) = def.validations.min_length {
                if length < min {
                    return Err(format!("field '{key}' must be at least {min} characters"));
                }
            }
            if let Some(max) = def.validations.max_length {
                if length > max {
                    return Err(format!("field '{key}' must be at most {max} characters"));
                }
            }
            if let Some(pattern) = &def.validations.regex {
                let re = Regex::new(pattern)
                    .map_err(|_| format!("field '{key}' has an invalid pattern constraint"))?;
                if !re.is_match(text) {
                    return Err(format!("field '{key}' does not match the required pattern"));
                }
            }
            Ok(())
        }
        FieldType::Number => {
            let number = value
                .as_f64()
                .ok_or_else(|| format!("field '{key}' must be a number"))?;
            if let Some(min) = def.validations.min {
                if number < min {
                    return Err(format!("field '{key}' must be at least {min}"));
                }
            }
            if let Some(max) = def.validations.max {
                if number > max {
                    return Err(format!("field '{key}' must be at most {max}"));
                }
            }
            Ok(())
        }
        FieldType::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(format!("field '{key}' must be a boolean"))
            }
        }
        FieldType::Date => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("field '{key}' must be a date string"))?;
            if is_valid_date(text) {
                Ok(())
            } else {
                Err(format!("field '{key}' must be a valid date"))
            }
        }
        FieldType::Select => {
            let choice = value
                .as_str()
                .ok_or_else(|| format!("field '{key}' must be a string"))?;
            if !def.options.is_empty() && !def.options.iter().any(|opt| opt == choice) {
                return Err(format!("field '{key}' must be one of the allowed options"));
            }
            Ok(())
        }
        FieldType::Multiselect => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("field '{key}' must be an array"))?;
            for item in items {
                let choice = item
                    .as_str()
                    .ok_or_else(|| format!("field '{key}' must contain only strings"))?;
                if !def.options.is_empty() && !def.options.iter().any(|opt| opt == choice) {
                    return Err(format!("field '{key}' must contain only allowed options"));
                }
            }
            Ok(())
        }
    }
}

fn is_valid_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok() || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}
