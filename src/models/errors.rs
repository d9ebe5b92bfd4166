use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Service-level errors that can occur in business logic
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Car not found: {id}")]
    CarNotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: u64 },

    #[error("Validation failed: {errors}")]
    Validation { errors: ValidationErrors },

    #[error("Repository error: {source}")]
    Repository {
        #[from]
        source: RepositoryError,
    },
}

/// Repository-level errors for data access operations
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database connection failed")]
    ConnectionFailed,

    #[error("Item not found")]
    NotFound,

    #[error("Invalid item: {message}")]
    InvalidItem { message: String },

    #[error("AWS SDK error: {message}")]
    AwsSdk { message: String },

    #[error("DynamoDB table not found: {table_name}. Ensure the table exists and IAM permissions are correct.")]
    TableNotFound { table_name: String },

    #[error("Transaction failed: {message}")]
    TransactionFailed { message: String },

    #[error("Timeout occurred during operation")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

/// A single field-level validation failure.
///
/// The display form is the message returned to API clients, so field names are
/// rendered with spaces instead of underscores ("user_id" -> "user id").
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("The {} field is required.", humanize(.field))]
    RequiredField { field: String },

    #[error("The {} must be {expected}.", humanize(.field))]
    InvalidType { field: String, expected: String },

    #[error("The {} must not be greater than {max_length} characters.", humanize(.field))]
    TooLong { field: String, max_length: usize },

    #[error("The {} {reason}.", humanize(.field))]
    InvalidValue { field: String, reason: String },

    #[error("The selected {} is invalid.", humanize(.field))]
    InvalidReference { field: String },

    #[error("The {} must match {other}.", humanize(.field))]
    Mismatch { field: String, other: String },
}

impl ValidationError {
    /// Name of the input field this error belongs to
    pub fn field(&self) -> &str {
        match self {
            ValidationError::RequiredField { field }
            | ValidationError::InvalidType { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidValue { field, .. }
            | ValidationError::InvalidReference { field }
            | ValidationError::Mismatch { field, .. } => field,
        }
    }
}

fn humanize(field: &str) -> String {
    field.replace('_', " ")
}

/// Field-level error report, serialized as `{field: [messages]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors
            .entry(error.field().to_string())
            .or_default()
            .push(error.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First message in field order, used as the summary line of a 422 body
    pub fn first_message(&self) -> Option<&str> {
        self.errors
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .next()
    }

    /// Records the error of a field-level check and keeps its value otherwise
    pub fn collect<T>(&mut self, result: ValidationResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.add(error);
                None
            }
        }
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self
            .errors
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .collect();
        write!(f, "{}", joined.join(" "))
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(err: ValidationError) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(err);
        errors
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation { errors }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation {
            errors: err.into(),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result type alias for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;
