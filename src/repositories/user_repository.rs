use async_trait::async_trait;
use aws_sdk_dynamodb::types::{KeysAndAttributes, Select};
use aws_sdk_dynamodb::Error as DynamoDbError;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::dynamodb::{
    build_error, key, read_string, read_timestamp, read_u64, string, timestamp, DynamoDbStore,
    Item,
};
use super::id_sequence::{DynamoDbIdSequence, USER_SEQUENCE};
use crate::models::{NewUser, RepositoryError, RepositoryResult, User, UserId};

/// DynamoDB caps BatchGetItem at 100 keys
const BATCH_GET_LIMIT: usize = 100;
const MAX_BATCH_ATTEMPTS: u32 = 5;

/// Trait defining the interface for user lookups
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by ID
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;

    /// Find several users at once; unknown ids are skipped
    async fn find_by_ids(&self, ids: Vec<UserId>) -> RepositoryResult<Vec<User>>;

    /// Check if a user exists
    async fn exists(&self, id: UserId) -> RepositoryResult<bool>;

    /// Create a user (admin seeding only)
    async fn create(&self, user: NewUser) -> RepositoryResult<User>;

    /// Count stored users
    async fn count(&self) -> RepositoryResult<usize>;
}

/// DynamoDB implementation of the UserRepository trait
pub struct DynamoDbUserRepository {
    store: DynamoDbStore,
    table_name: String,
    sequence: DynamoDbIdSequence,
}

impl DynamoDbUserRepository {
    pub fn new(store: DynamoDbStore, table_name: String, sequence: DynamoDbIdSequence) -> Self {
        Self {
            store,
            table_name,
            sequence,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn user_to_item(&self, user: &User) -> Item {
        let mut item = key(user.id);
        item.insert("name".to_string(), string(&user.name));
        item.insert("email".to_string(), string(&user.email));
        item.insert("created_at".to_string(), timestamp(&user.created_at));
        item.insert("updated_at".to_string(), timestamp(&user.updated_at));
        item
    }

    pub fn item_to_user(&self, item: &Item) -> RepositoryResult<User> {
        let created_at = read_timestamp(item, "created_at")?;
        let updated_at = read_timestamp(item, "updated_at").unwrap_or(created_at);

        Ok(User {
            id: read_u64(item, "id")?,
            name: read_string(item, "name")?,
            email: read_string(item, "email")?,
            created_at,
            updated_at,
        })
    }

    /// Fetch one batch of at most 100 keys, retrying unprocessed keys
    async fn batch_get(&self, ids: &[UserId]) -> RepositoryResult<Vec<User>> {
        let keys: Vec<Item> = ids.iter().map(|id| key(*id)).collect();
        let keys_and_attributes = KeysAndAttributes::builder()
            .set_keys(Some(keys))
            .build()
            .map_err(build_error)?;

        let mut request_items = HashMap::from([(self.table_name.clone(), keys_and_attributes)]);
        let mut users = Vec::with_capacity(ids.len());
        let mut attempt = 0;

        while !request_items.is_empty() {
            if attempt >= MAX_BATCH_ATTEMPTS {
                warn!("Giving up on unprocessed user keys after {} attempts", attempt);
                return Err(RepositoryError::Timeout);
            }
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            attempt += 1;

            let pending = std::mem::take(&mut request_items);
            let response = self
                .store
                .run("BatchGetItem", &self.table_name, async {
                    self.store
                        .client()
                        .batch_get_item()
                        .set_request_items(Some(pending))
                        .send()
                        .await
                        .map_err(DynamoDbError::from)
                })
                .await?;

            if let Some(items) = response
                .responses
                .and_then(|mut responses| responses.remove(&self.table_name))
            {
                for item in &items {
                    users.push(self.item_to_user(item)?);
                }
            }

            request_items = response.unprocessed_keys.unwrap_or_default();
        }

        Ok(users)
    }
}

#[async_trait]
impl UserRepository for DynamoDbUserRepository {
    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let response = self
            .store
            .run("GetItem", &self.table_name, async {
                self.store
                    .client()
                    .get_item()
                    .table_name(&self.table_name)
                    .set_key(Some(key(id)))
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        response
            .item
            .map(|item| self.item_to_user(&item))
            .transpose()
    }

    #[instrument(skip(self, ids), fields(table = %self.table_name, count = ids.len()))]
    async fn find_by_ids(&self, mut ids: Vec<UserId>) -> RepositoryResult<Vec<User>> {
        ids.sort_unstable();
        ids.dedup();

        let mut users = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_GET_LIMIT) {
            users.extend(self.batch_get(chunk).await?);
        }

        info!("Loaded {} of {} users", users.len(), ids.len());
        Ok(users)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn exists(&self, id: UserId) -> RepositoryResult<bool> {
        let response = self
            .store
            .run("GetItem", &self.table_name, async {
                self.store
                    .client()
                    .get_item()
                    .table_name(&self.table_name)
                    .set_key(Some(key(id)))
                    .projection_expression("id")
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        Ok(response.item.is_some())
    }

    #[instrument(skip(self, user), fields(table = %self.table_name, email = %user.email))]
    async fn create(&self, user: NewUser) -> RepositoryResult<User> {
        let id = self.sequence.next_id(USER_SEQUENCE).await?;
        let user = User::from_new(id, user, Utc::now());
        let item = self.user_to_item(&user);

        self.store
            .run("PutItem", &self.table_name, async {
                self.store
                    .client()
                    .put_item()
                    .table_name(&self.table_name)
                    .set_item(Some(item))
                    .condition_expression("attribute_not_exists(id)")
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        info!("User {} created", user.id);
        Ok(user)
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn count(&self) -> RepositoryResult<usize> {
        let mut total = 0usize;
        let mut start_key: Option<Item> = None;

        loop {
            let exclusive_start_key = start_key.take();
            let response = self
                .store
                .run("Scan", &self.table_name, async {
                    self.store
                        .client()
                        .scan()
                        .table_name(&self.table_name)
                        .select(Select::Count)
                        .set_exclusive_start_key(exclusive_start_key)
                        .send()
                        .await
                        .map_err(DynamoDbError::from)
                })
                .await?;

            total += response.count.max(0) as usize;

            match response.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => start_key = Some(last_key),
                _ => break,
            }
        }

        Ok(total)
    }
}
