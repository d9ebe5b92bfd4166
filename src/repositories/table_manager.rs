use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::{Client as DynamoDbClient, Error as DynamoDbError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::dynamodb::build_error;
use crate::models::{RepositoryError, RepositoryResult};

/// Manages DynamoDB table creation and configuration
pub struct TableManager {
    client: Arc<DynamoDbClient>,
    wait_interval: Duration,
}

impl TableManager {
    /// Create a new table manager
    pub fn new(client: Arc<DynamoDbClient>) -> Self {
        Self {
            client,
            wait_interval: Duration::from_secs(10),
        }
    }

    /// Poll faster while waiting for tables (DynamoDB Local creates them instantly)
    pub fn with_wait_interval(mut self, wait_interval: Duration) -> Self {
        self.wait_interval = wait_interval;
        self
    }

    /// Create the cars table
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn create_cars_table(&self, table_name: &str) -> RepositoryResult<()> {
        self.create_simple_table(table_name, "id", ScalarAttributeType::N)
            .await
    }

    /// Create the users table
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn create_users_table(&self, table_name: &str) -> RepositoryResult<()> {
        self.create_simple_table(table_name, "id", ScalarAttributeType::N)
            .await
    }

    /// Create the id sequences table
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn create_sequences_table(&self, table_name: &str) -> RepositoryResult<()> {
        self.create_simple_table(table_name, "name", ScalarAttributeType::S)
            .await
    }

    async fn create_simple_table(
        &self,
        table_name: &str,
        key_name: &str,
        key_type: ScalarAttributeType,
    ) -> RepositoryResult<()> {
        if self.table_exists(table_name).await? {
            info!("Table {} already exists", table_name);
            return Ok(());
        }

        self.client
            .create_table()
            .table_name(table_name)
            .attribute_definitions(attribute(key_name, key_type)?)
            .key_schema(hash_key(key_name)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| self.map_dynamodb_error(e.into()))?;

        self.wait_for_table_active(table_name).await?;
        info!("Table {} created successfully", table_name);

        Ok(())
    }

    /// Check if a table exists
    pub async fn table_exists(&self, table_name: &str) -> RepositoryResult<bool> {
        Ok(self.describe_table(table_name).await?.is_some())
    }

    /// Wait for a table to become active
    #[instrument(skip(self), fields(table_name = %table_name))]
    async fn wait_for_table_active(&self, table_name: &str) -> RepositoryResult<()> {
        let max_attempts = 30;

        for _ in 0..max_attempts {
            let response = self
                .client
                .describe_table()
                .table_name(table_name)
                .send()
                .await
                .map_err(|e| self.map_dynamodb_error(e.into()))?;

            match response.table.and_then(|table| table.table_status) {
                Some(TableStatus::Active) => {
                    info!("Table {} is now active", table_name);
                    return Ok(());
                }
                Some(status) => info!("Table {} status: {:?}, waiting...", table_name, status),
                None => warn!("Table {} status unknown, waiting...", table_name),
            }

            tokio::time::sleep(self.wait_interval).await;
        }

        error!("Timeout waiting for table {} to become active", table_name);
        Err(RepositoryError::Timeout)
    }

    /// Delete a table (for testing/cleanup)
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn delete_table(&self, table_name: &str) -> RepositoryResult<()> {
        if !self.table_exists(table_name).await? {
            info!("Table {} does not exist, nothing to delete", table_name);
            return Ok(());
        }

        self.client
            .delete_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(|e| self.map_dynamodb_error(e.into()))?;

        info!("Table {} deletion initiated", table_name);
        Ok(())
    }

    /// Report a table's status, or None when it does not exist
    #[instrument(skip(self), fields(table_name = %table_name))]
    pub async fn describe_table(&self, table_name: &str) -> RepositoryResult<Option<String>> {
        match self.client.describe_table().table_name(table_name).send().await {
            Ok(response) => Ok(Some(
                response
                    .table
                    .and_then(|table| table.table_status)
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            )),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Ok(None)
                } else {
                    error!("Error describing table: {}", service_error);
                    Err(RepositoryError::ConnectionFailed)
                }
            }
        }
    }

    /// Create every table the service needs
    #[instrument(skip(self))]
    pub async fn create_all_tables(
        &self,
        cars_table: &str,
        users_table: &str,
        sequences_table: &str,
    ) -> RepositoryResult<()> {
        let (cars, users, sequences) = tokio::join!(
            self.create_cars_table(cars_table),
            self.create_users_table(users_table),
            self.create_sequences_table(sequences_table),
        );

        cars?;
        users?;
        sequences?;

        info!("All tables created successfully");
        Ok(())
    }

    fn map_dynamodb_error(&self, error: DynamoDbError) -> RepositoryError {
        error!("DynamoDB error: {:?}", error);
        RepositoryError::AwsSdk {
            message: error.to_string(),
        }
    }
}

fn attribute(name: &str, attribute_type: ScalarAttributeType) -> RepositoryResult<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(attribute_type)
        .build()
        .map_err(build_error)
}

fn hash_key(name: &str) -> RepositoryResult<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(KeyType::Hash)
        .build()
        .map_err(build_error)
}
