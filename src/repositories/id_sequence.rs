use aws_sdk_dynamodb::types::ReturnValue;
use aws_sdk_dynamodb::Error as DynamoDbError;
use tracing::{debug, instrument};

use super::dynamodb::{number, read_u64, string, DynamoDbStore};
use crate::models::{RepositoryError, RepositoryResult};

pub const CAR_SEQUENCE: &str = "cars";
pub const USER_SEQUENCE: &str = "users";

/// Monotonic integer ids backed by an atomic counter item per sequence
#[derive(Clone)]
pub struct DynamoDbIdSequence {
    store: DynamoDbStore,
    table_name: String,
}

impl DynamoDbIdSequence {
    pub fn new(store: DynamoDbStore, table_name: String) -> Self {
        Self { store, table_name }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Atomically increment the named counter and return the new value.
    ///
    /// A missing counter item starts at zero, so the first id is 1.
    #[instrument(skip(self), fields(table = %self.table_name, sequence = %sequence))]
    pub async fn next_id(&self, sequence: &str) -> RepositoryResult<u64> {
        let response = self
            .store
            .run("UpdateItem", &self.table_name, async {
                self.store
                    .client()
                    .update_item()
                    .table_name(&self.table_name)
                    .key("name", string(sequence))
                    .update_expression("ADD next_value :one")
                    .expression_attribute_values(":one", number(1))
                    .return_values(ReturnValue::UpdatedNew)
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        let attributes = response
            .attributes
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: format!("Sequence {} returned no value", sequence),
            })?;
        let id = read_u64(&attributes, "next_value")?;

        debug!("Allocated id {} from sequence {}", id, sequence);
        Ok(id)
    }
}
