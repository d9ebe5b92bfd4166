use async_trait::async_trait;
use aws_sdk_dynamodb::types::{Put, ReturnValue, Select, TransactWriteItem, Update};
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::Error as DynamoDbError;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use super::dynamodb::{
    build_error, failed_condition_index, key, map_dynamodb_error, number, read_optional_u64,
    read_string, read_timestamp, read_u64, string, timestamp, DynamoDbStore, Item,
};
use super::id_sequence::{DynamoDbIdSequence, CAR_SEQUENCE};
use crate::models::{Car, CarId, NewCar, RepositoryError, RepositoryResult, UserId};

/// DynamoDB caps a transaction at 100 items
pub(crate) const MAX_TRANSACTION_ITEMS: usize = 100;

/// Condition on the car written by `create`
pub(crate) const CREATE_CONDITION: &str = "attribute_not_exists(id)";
/// Condition on the car written by `update`
pub(crate) const UPDATE_CONDITION: &str = "attribute_exists(id)";
/// Condition on each dissociated car: it must still exist and still belong
/// to the new owner
pub(crate) const DISSOCIATE_CONDITION: &str = "attribute_exists(id) AND user_id = :user_id";

const OWNER_FILTER: &str = "user_id = :user_id";

/// Trait defining the interface for car data access operations
#[async_trait]
pub trait CarRepository: Send + Sync {
    /// Find every car
    async fn find_all(&self) -> RepositoryResult<Vec<Car>>;

    /// Find a car by ID
    async fn find_by_id(&self, id: CarId) -> RepositoryResult<Option<Car>>;

    /// Find the cars currently owned by a user.
    ///
    /// Dissociation is computed from this result, so it must observe every
    /// committed write.
    async fn find_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<Car>>;

    /// Create a car, clearing the owner of the `dissociate` cars in the same
    /// write. The store assigns the id and timestamps.
    async fn create(&self, car: NewCar, dissociate: Vec<CarId>) -> RepositoryResult<Car>;

    /// Replace an existing car, clearing the owner of the `dissociate` cars in
    /// the same write. The store refreshes `updated_at`.
    async fn update(&self, car: Car, dissociate: Vec<CarId>) -> RepositoryResult<Car>;

    /// Set the owner of a car without touching any other record
    async fn assign_owner(&self, id: CarId, user_id: UserId) -> RepositoryResult<Car>;

    /// Delete a car
    async fn delete(&self, id: CarId) -> RepositoryResult<()>;

    /// Count stored cars
    async fn count(&self) -> RepositoryResult<usize>;
}

/// DynamoDB implementation of the CarRepository trait
pub struct DynamoDbCarRepository {
    store: DynamoDbStore,
    table_name: String,
    sequence: DynamoDbIdSequence,
}

impl DynamoDbCarRepository {
    /// Create a new DynamoDB car repository
    pub fn new(store: DynamoDbStore, table_name: String, sequence: DynamoDbIdSequence) -> Self {
        Self {
            store,
            table_name,
            sequence,
        }
    }

    /// Get the table name (for testing)
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Convert a Car struct to DynamoDB attribute values.
    ///
    /// An unowned car has no `user_id` attribute at all.
    pub fn car_to_item(&self, car: &Car) -> Item {
        let mut item = key(car.id);
        item.insert("name".to_string(), string(&car.name));
        if let Some(user_id) = car.user_id {
            item.insert("user_id".to_string(), number(user_id));
        }
        item.insert("created_at".to_string(), timestamp(&car.created_at));
        item.insert("updated_at".to_string(), timestamp(&car.updated_at));
        item
    }

    /// Convert DynamoDB item to Car struct
    pub fn item_to_car(&self, item: &Item) -> RepositoryResult<Car> {
        let created_at = read_timestamp(item, "created_at")?;
        let updated_at = read_timestamp(item, "updated_at").unwrap_or(created_at);

        Ok(Car {
            id: read_u64(item, "id")?,
            name: read_string(item, "name")?,
            user_id: read_optional_u64(item, "user_id")?,
            created_at,
            updated_at,
        })
    }

    pub(crate) fn put_item(&self, car: &Car, condition: &str) -> RepositoryResult<TransactWriteItem> {
        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(self.car_to_item(car)))
            .condition_expression(condition)
            .build()
            .map_err(build_error)?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    fn dissociate_item(
        &self,
        id: CarId,
        owner: UserId,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<TransactWriteItem> {
        let update = Update::builder()
            .table_name(&self.table_name)
            .set_key(Some(key(id)))
            .update_expression("REMOVE user_id SET updated_at = :updated_at")
            .condition_expression(DISSOCIATE_CONDITION)
            .expression_attribute_values(":updated_at", timestamp(now))
            .expression_attribute_values(":user_id", number(owner))
            .build()
            .map_err(build_error)?;

        Ok(TransactWriteItem::builder().update(update).build())
    }

    /// Transaction items in submission order: the dissociations, then the
    /// car write as the last item
    pub(crate) fn transaction_items(
        &self,
        write: TransactWriteItem,
        owner: Option<UserId>,
        dissociate: &[CarId],
        now: &DateTime<Utc>,
    ) -> RepositoryResult<Vec<TransactWriteItem>> {
        if dissociate.len() + 1 > MAX_TRANSACTION_ITEMS {
            return Err(RepositoryError::TransactionFailed {
                message: format!(
                    "{} dissociations exceed the transaction limit",
                    dissociate.len()
                ),
            });
        }

        let mut items = match (owner, dissociate.is_empty()) {
            (_, true) => Vec::with_capacity(1),
            (Some(owner), false) => dissociate
                .iter()
                .map(|id| self.dissociate_item(*id, owner, now))
                .collect::<RepositoryResult<Vec<_>>>()?,
            (None, false) => {
                return Err(RepositoryError::TransactionFailed {
                    message: "Dissociation requires the car to have an owner".to_string(),
                })
            }
        };
        items.push(write);

        Ok(items)
    }

    /// Submit the dissociations followed by the car write as one transaction
    async fn write_with_dissociations(
        &self,
        car: &Car,
        condition: &str,
        dissociate: &[CarId],
    ) -> RepositoryResult<()> {
        let write = self.put_item(car, condition)?;
        let items = self.transaction_items(write, car.user_id, dissociate, &car.updated_at)?;
        let target = items.len() - 1;
        let target_must_exist = condition == UPDATE_CONDITION;

        self.store
            .run_with_mapping(
                "TransactWriteItems",
                &self.table_name,
                async {
                    self.store
                        .client()
                        .transact_write_items()
                        .set_transact_items(Some(items))
                        .send()
                        .await
                        .map_err(DynamoDbError::from)
                },
                |error| map_transaction_error(error, &self.table_name, target, target_must_exist),
            )
            .await?;

        Ok(())
    }

    /// Strongly consistent scan for the cars owned by a user, one page per call
    pub(crate) fn owner_scan(&self, user_id: UserId, start_key: Option<Item>) -> ScanFluentBuilder {
        self.store
            .client()
            .scan()
            .table_name(&self.table_name)
            .filter_expression(OWNER_FILTER)
            .expression_attribute_values(":user_id", number(user_id))
            .consistent_read(true)
            .set_exclusive_start_key(start_key)
    }
}

/// Map a cancelled car transaction.
///
/// Only a failed condition on the car being written (`target`) means that
/// car is missing; a dissociated car that changed concurrently fails the
/// whole write.
pub(crate) fn map_transaction_error(
    error: DynamoDbError,
    table_name: &str,
    target: usize,
    target_must_exist: bool,
) -> RepositoryError {
    match failed_condition_index(&error) {
        Some(index) if index == target && target_must_exist => RepositoryError::NotFound,
        Some(index) if index == target => RepositoryError::TransactionFailed {
            message: "Car id already in use".to_string(),
        },
        Some(index) => {
            warn!("Dissociated car at transaction item {} changed concurrently", index);
            RepositoryError::TransactionFailed {
                message: format!("Condition failed on transaction item {}", index),
            }
        }
        None => map_dynamodb_error(error, table_name),
    }
}

#[async_trait]
impl CarRepository for DynamoDbCarRepository {
    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn find_all(&self) -> RepositoryResult<Vec<Car>> {
        info!("Finding all cars");

        let mut cars = Vec::new();
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
                        .set_exclusive_start_key(exclusive_start_key)
                        .send()
                        .await
                        .map_err(DynamoDbError::from)
                })
                .await?;

            for item in response.items.unwrap_or_default() {
                match self.item_to_car(&item) {
                    Ok(car) => cars.push(car),
                    Err(e) => {
                        warn!("Failed to parse car item: {}", e);
                        continue;
                    }
                }
            }

            match response.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => start_key = Some(last_key),
                _ => break,
            }
        }

        cars.sort_by_key(|car| car.id);

        info!("Found {} cars", cars.len());
        Ok(cars)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn find_by_id(&self, id: CarId) -> RepositoryResult<Option<Car>> {
        let response = self
            .store
            .run("GetItem", &self.table_name, async {
                self.store
                    .client()
                    .get_item()
                    .table_name(&self.table_name)
                    .set_key(Some(key(id)))
                    .consistent_read(true)
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        match response.item {
            Some(item) => Ok(Some(self.item_to_car(&item)?)),
            None => {
                info!("Car not found");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, user_id = %user_id))]
    async fn find_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<Car>> {
        let mut cars = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let request = self.owner_scan(user_id, start_key.take());
            let response = self
                .store
                .run("Scan", &self.table_name, async {
                    request.send().await.map_err(DynamoDbError::from)
                })
                .await?;

            for item in response.items.unwrap_or_default() {
                cars.push(self.item_to_car(&item)?);
            }

            match response.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => start_key = Some(last_key),
                _ => break,
            }
        }

        info!("User owns {} cars", cars.len());
        Ok(cars)
    }

    #[instrument(skip(self, car), fields(table = %self.table_name, user_id = ?car.user_id, dissociate = ?dissociate))]
    async fn create(&self, car: NewCar, dissociate: Vec<CarId>) -> RepositoryResult<Car> {
        let id = self.sequence.next_id(CAR_SEQUENCE).await?;
        let now = Utc::now();
        let car = Car::from_new(id, car, now);

        self.write_with_dissociations(&car, CREATE_CONDITION, &dissociate)
            .await?;

        info!("Car {} created", car.id);
        Ok(car)
    }

    #[instrument(skip(self, car), fields(table = %self.table_name, id = %car.id, dissociate = ?dissociate))]
    async fn update(&self, mut car: Car, dissociate: Vec<CarId>) -> RepositoryResult<Car> {
        car.updated_at = Utc::now();

        self.write_with_dissociations(&car, UPDATE_CONDITION, &dissociate)
            .await?;

        info!("Car updated");
        Ok(car)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id, user_id = %user_id))]
    async fn assign_owner(&self, id: CarId, user_id: UserId) -> RepositoryResult<Car> {
        let now = Utc::now();

        let response = self
            .store
            .run("UpdateItem", &self.table_name, async {
                self.store
                    .client()
                    .update_item()
                    .table_name(&self.table_name)
                    .set_key(Some(key(id)))
                    .update_expression("SET user_id = :user_id, updated_at = :updated_at")
                    .condition_expression("attribute_exists(id)")
                    .expression_attribute_values(":user_id", number(user_id))
                    .expression_attribute_values(":updated_at", timestamp(&now))
                    .return_values(ReturnValue::AllNew)
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        let attributes = response.attributes.ok_or(RepositoryError::NotFound)?;
        self.item_to_car(&attributes)
    }

    #[instrument(skip(self), fields(table = %self.table_name, id = %id))]
    async fn delete(&self, id: CarId) -> RepositoryResult<()> {
        self.store
            .run("DeleteItem", &self.table_name, async {
                self.store
                    .client()
                    .delete_item()
                    .table_name(&self.table_name)
                    .set_key(Some(key(id)))
                    .condition_expression("attribute_exists(id)")
                    .send()
                    .await
                    .map_err(DynamoDbError::from)
            })
            .await?;

        info!("Car deleted successfully");
        Ok(())
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
