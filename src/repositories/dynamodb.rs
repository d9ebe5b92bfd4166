use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::{Client as DynamoDbClient, Error as DynamoDbError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, Instrument};

use crate::models::{RepositoryError, RepositoryResult};
use crate::observability::Metrics;

pub type Item = HashMap<String, AttributeValue>;

/// DynamoDB client shared by the repositories, with per-call tracing and metrics
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Arc<DynamoDbClient>,
    region: String,
    metrics: Option<Arc<Metrics>>,
}

impl DynamoDbStore {
    pub fn new(client: Arc<DynamoDbClient>, region: String) -> Self {
        Self {
            client,
            region,
            metrics: None,
        }
    }

    /// Record `database_operations_total` and durations for every call
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn client(&self) -> &DynamoDbClient {
        &self.client
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Run one DynamoDB call inside a client span, mapping SDK errors
    pub(crate) async fn run<T, F>(
        &self,
        operation: &str,
        table_name: &str,
        call: F,
    ) -> RepositoryResult<T>
    where
        F: Future<Output = Result<T, DynamoDbError>>,
    {
        self.run_with_mapping(operation, table_name, call, |e| {
            map_dynamodb_error(e, table_name)
        })
        .await
    }

    /// Like [`run`](Self::run), with a caller-supplied error mapping
    pub(crate) async fn run_with_mapping<T, F, M>(
        &self,
        operation: &str,
        table_name: &str,
        call: F,
        map_error: M,
    ) -> RepositoryResult<T>
    where
        F: Future<Output = Result<T, DynamoDbError>>,
        M: FnOnce(DynamoDbError) -> RepositoryError,
    {
        let span = dynamodb_span(operation, table_name, &self.region);
        let start_time = Instant::now();

        let result = call.instrument(span).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_database_operation(
                operation,
                table_name,
                result.is_ok(),
                start_time.elapsed().as_secs_f64(),
            );
        }

        result.map_err(map_error)
    }
}

/// Create a DynamoDB subsegment span with X-Ray and OpenTelemetry attributes
fn dynamodb_span(operation: &str, table_name: &str, region: &str) -> tracing::Span {
    tracing::info_span!(
        "DynamoDB",
        "aws.service" = "DynamoDB",
        "aws.operation" = operation,
        "aws.region" = %region,
        "aws.dynamodb.table_name" = %table_name,
        "aws.remote.service" = "AWS::DynamoDB",
        "aws.remote.operation" = operation,
        "aws.remote.resource.type" = "AWS::DynamoDB::Table",
        "aws.remote.resource.identifier" = %table_name,
        "otel.kind" = "client",
        "otel.name" = format!("DynamoDB.{}", operation),
        "rpc.system" = "aws-api",
        "rpc.service" = "AmazonDynamoDBv2",
        "rpc.method" = operation,
        "db.system" = "dynamodb",
        "db.name" = %table_name,
        "db.operation" = operation,
    )
}

/// Convert DynamoDB error to RepositoryError
pub(crate) fn map_dynamodb_error(error: DynamoDbError, table_name: &str) -> RepositoryError {
    match error {
        DynamoDbError::ResourceNotFoundException(_) => RepositoryError::TableNotFound {
            table_name: table_name.to_string(),
        },
        DynamoDbError::ConditionalCheckFailedException(_) => RepositoryError::NotFound,
        // Which item failed is only meaningful to the caller that built the
        // transaction; see `failed_condition_index`
        DynamoDbError::TransactionCanceledException(e) => {
            error!("DynamoDB transaction cancelled: {:?}", e);
            RepositoryError::TransactionFailed {
                message: e.to_string(),
            }
        }
        DynamoDbError::ProvisionedThroughputExceededException(_)
        | DynamoDbError::RequestLimitExceeded(_) => RepositoryError::RateLimitExceeded,
        other => {
            error!("DynamoDB error: {:?}", other);
            RepositoryError::AwsSdk {
                message: other.to_string(),
            }
        }
    }
}

/// Position of the first transaction item cancelled by a failed condition
pub(crate) fn failed_condition_index(error: &DynamoDbError) -> Option<usize> {
    match error {
        DynamoDbError::TransactionCanceledException(e) => e
            .cancellation_reasons()
            .iter()
            .position(|reason| reason.code() == Some("ConditionalCheckFailed")),
        _ => None,
    }
}

/// Map an SDK builder failure (missing required field) to a repository error
pub(crate) fn build_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::AwsSdk {
        message: format!("Failed to build DynamoDB request: {}", error),
    }
}

pub(crate) fn number(value: u64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub(crate) fn string(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

pub(crate) fn timestamp(value: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339())
}

pub(crate) fn key(id: u64) -> Item {
    HashMap::from([("id".to_string(), number(id))])
}

pub(crate) fn read_u64(item: &Item, name: &str) -> RepositoryResult<u64> {
    read_optional_u64(item, name)?.ok_or_else(|| RepositoryError::InvalidItem {
        message: format!("Missing {}", name),
    })
}

pub(crate) fn read_optional_u64(item: &Item, name: &str) -> RepositoryResult<Option<u64>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(value) => value
            .as_n()
            .ok()
            .and_then(|n| n.parse().ok())
            .map(Some)
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: format!("Invalid {}", name),
            }),
    }
}

pub(crate) fn read_string(item: &Item, name: &str) -> RepositoryResult<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidItem {
            message: format!("Missing {}", name),
        })
}

pub(crate) fn read_timestamp(item: &Item, name: &str) -> RepositoryResult<DateTime<Utc>> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RepositoryError::InvalidItem {
            message: format!("Invalid {}", name),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::error::TransactionCanceledException;
    use aws_sdk_dynamodb::types::CancellationReason;

    fn cancelled(codes: &[&str]) -> DynamoDbError {
        let reasons = codes
            .iter()
            .map(|code| CancellationReason::builder().code(*code).build())
            .collect();
        DynamoDbError::TransactionCanceledException(
            TransactionCanceledException::builder()
                .message("Transaction cancelled")
                .set_cancellation_reasons(Some(reasons))
                .build(),
        )
    }

    #[test]
    fn test_failed_condition_index() {
        assert_eq!(
            failed_condition_index(&cancelled(&["None", "ConditionalCheckFailed"])),
            Some(1)
        );
        assert_eq!(
            failed_condition_index(&cancelled(&["ConditionalCheckFailed", "None"])),
            Some(0)
        );
        assert_eq!(failed_condition_index(&cancelled(&["None", "ThrottlingError"])), None);
    }

    #[test]
    fn test_cancelled_transaction_is_not_a_missing_item() {
        let error = map_dynamodb_error(cancelled(&["ConditionalCheckFailed", "None"]), "Cars");
        assert!(matches!(error, RepositoryError::TransactionFailed { .. }));
    }

    #[test]
    fn test_read_optional_u64() {
        let mut item = key(12);
        item.insert("user_id".to_string(), AttributeValue::Null(true));

        assert_eq!(read_u64(&item, "id").unwrap(), 12);
        assert_eq!(read_optional_u64(&item, "user_id").unwrap(), None);
        assert_eq!(read_optional_u64(&item, "missing").unwrap(), None);

        item.insert("user_id".to_string(), string("not-a-number"));
        assert!(matches!(
            read_optional_u64(&item, "user_id"),
            Err(RepositoryError::InvalidItem { .. })
        ));
    }

    #[test]
    fn test_read_timestamp_roundtrip() {
        let now = Utc::now();
        let item = HashMap::from([("created_at".to_string(), timestamp(&now))]);

        assert_eq!(read_timestamp(&item, "created_at").unwrap(), now);
        assert!(read_timestamp(&item, "updated_at").is_err());
    }

    #[test]
    fn test_read_string_missing() {
        let item = key(1);
        match read_string(&item, "name") {
            Err(RepositoryError::InvalidItem { message }) => assert_eq!(message, "Missing name"),
            other => panic!("Expected InvalidItem, got {:?}", other),
        }
    }
}
