use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{
    CarId, CreateCarRequest, OwnershipPolicy, ReassignOwnerRequest, UpdateCarRequest,
    ValidationError, ValidationErrors, ValidationResult,
};

/// Validation constants
pub const MAX_CAR_NAME_LENGTH: usize = 255;

pub const FIELD_NAME: &str = "name";
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_CAR_ID: &str = "car_id";

/// Raw request fields merged from the query string and the JSON body.
///
/// Body fields take precedence over query parameters with the same name.
/// Nothing is typed yet: conversion into a request struct performs all
/// field-level checks and reports every failing field at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarInput {
    fields: Map<String, Value>,
}

impl CarInput {
    pub fn from_parts(query: HashMap<String, String>, body: Option<Map<String, Value>>) -> Self {
        let mut fields: Map<String, Value> = query
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        if let Some(body) = body {
            fields.extend(body);
        }

        Self { fields }
    }

    /// Build input from a JSON value; anything but an object yields no fields
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_create_request(
        &self,
        policy: OwnershipPolicy,
    ) -> Result<CreateCarRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = errors
            .collect(validate_car_name(self.get(FIELD_NAME)))
            .and_then(|name| {
                if name.is_none() {
                    errors.add(required(FIELD_NAME));
                }
                name
            });

        let user_id = match errors.collect(validate_id_field(FIELD_USER_ID, self.get(FIELD_USER_ID)))
        {
            Some(Some(Some(user_id))) => Some(user_id),
            Some(_) if policy.requires_owner() => {
                errors.add(required(FIELD_USER_ID));
                None
            }
            _ => None,
        };

        errors.into_result()?;

        let name = name.ok_or_else(|| ValidationErrors::from(required(FIELD_NAME)))?;
        Ok(CreateCarRequest { name, user_id })
    }

    pub fn into_update_request(&self) -> Result<UpdateCarRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = errors
            .collect(validate_car_name(self.get(FIELD_NAME)))
            .flatten();
        let user_id = errors
            .collect(validate_id_field(FIELD_USER_ID, self.get(FIELD_USER_ID)))
            .flatten();
        let car_id = errors
            .collect(validate_id_field(FIELD_CAR_ID, self.get(FIELD_CAR_ID)))
            .flatten()
            .flatten();

        errors.into_result()?;

        Ok(UpdateCarRequest {
            name,
            user_id,
            car_id,
        })
    }

    pub fn into_reassign_request(&self) -> Result<ReassignOwnerRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let car_id = required_id(&mut errors, FIELD_CAR_ID, self.get(FIELD_CAR_ID));
        let user_id = required_id(&mut errors, FIELD_USER_ID, self.get(FIELD_USER_ID));

        match (car_id, user_id) {
            (Some(car_id), Some(user_id)) if errors.is_empty() => {
                Ok(ReassignOwnerRequest { car_id, user_id })
            }
            _ => Err(errors),
        }
    }
}

/// Validate a car name.
///
/// Returns `Ok(None)` when the field is absent. A present but null or blank
/// name counts as missing and fails as a required field.
pub fn validate_car_name(value: Option<&Value>) -> ValidationResult<Option<String>> {
    let raw = match value {
        None => return Ok(None),
        Some(Value::Null) => return Err(required(FIELD_NAME)),
        Some(Value::String(raw)) => raw,
        Some(_) => {
            return Err(ValidationError::InvalidType {
                field: FIELD_NAME.to_string(),
                expected: "a string".to_string(),
            })
        }
    };

    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(required(FIELD_NAME));
    }

    if trimmed.chars().count() > MAX_CAR_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: FIELD_NAME.to_string(),
            max_length: MAX_CAR_NAME_LENGTH,
        });
    }

    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidValue {
            field: FIELD_NAME.to_string(),
            reason: "contains invalid control characters".to_string(),
        });
    }

    Ok(Some(trimmed.to_string()))
}

/// Validate an integer id field.
///
/// Absent fields yield `None`; explicit `null` or a blank string yields
/// `Some(None)`; numbers and numeric strings yield `Some(Some(id))`.
pub fn validate_id_field(field: &str, value: Option<&Value>) -> ValidationResult<Option<Option<u64>>> {
    match value {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Some(None)),
        Some(value) => parse_id(field, value).map(|id| Some(Some(id))),
    }
}

fn parse_id(field: &str, value: &Value) -> ValidationResult<u64> {
    let parsed = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ValidationError::InvalidType {
        field: field.to_string(),
        expected: "an integer".to_string(),
    })
}

fn required_id(errors: &mut ValidationErrors, field: &str, value: Option<&Value>) -> Option<u64> {
    match errors.collect(validate_id_field(field, value)) {
        Some(Some(Some(id))) => Some(id),
        Some(_) => {
            errors.add(required(field));
            None
        }
        None => None,
    }
}

fn required(field: &str) -> ValidationError {
    ValidationError::RequiredField {
        field: field.to_string(),
    }
}

/// Invalid-reference error for an id that names no existing record
pub fn unknown_reference(field: &str) -> ValidationError {
    ValidationError::InvalidReference {
        field: field.to_string(),
    }
}

/// Mismatch error for a body `car_id` that disagrees with the path id
pub fn car_id_mismatch(expected: CarId) -> ValidationError {
    ValidationError::Mismatch {
        field: FIELD_CAR_ID.to_string(),
        other: format!("the car being updated ({})", expected),
    }
}
