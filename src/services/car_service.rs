use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::models::{
    car_id_mismatch, unknown_reference, Car, CarId, CarInput, CarWithUser, CreateCarRequest,
    OwnershipPolicy, ReassignOwnerRequest, ReassignOwnerResponse, RepositoryError, ServiceError,
    ServiceResult, UpdateCarRequest, UserId, ValidationErrors, FIELD_USER_ID,
};
use crate::observability::Metrics;
use crate::repositories::{CarRepository, UserRepository};

/// Service owning the car/user association.
///
/// Every write that sets an owner through `create` or `update` first clears
/// that owner from any other car, so a user owns at most one car. The
/// explicit `reassign_owner` operation skips that step.
pub struct CarService {
    cars: Arc<dyn CarRepository>,
    users: Arc<dyn UserRepository>,
    policy: OwnershipPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl CarService {
    /// Create a new CarService
    pub fn new(
        cars: Arc<dyn CarRepository>,
        users: Arc<dyn UserRepository>,
        policy: OwnershipPolicy,
    ) -> Self {
        Self {
            cars,
            users,
            policy,
            metrics: None,
        }
    }

    /// Count dissociations in `car_dissociations_total`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> OwnershipPolicy {
        self.policy
    }

    /// List every car with its owner embedded
    #[instrument(skip(self))]
    pub async fn list(&self) -> ServiceResult<Vec<CarWithUser>> {
        crate::info_with_trace!("Listing cars");

        let cars = self.cars.find_all().await?;
        let owner_ids: Vec<UserId> = cars.iter().filter_map(|car| car.user_id).collect();

        let owners: HashMap<UserId, _> = if owner_ids.is_empty() {
            HashMap::new()
        } else {
            self.users
                .find_by_ids(owner_ids)
                .await?
                .into_iter()
                .map(|user| (user.id, user))
                .collect()
        };

        let mut listed: Vec<CarWithUser> = cars
            .into_iter()
            .map(|car| {
                let owner = car.user_id.and_then(|id| owners.get(&id).cloned());
                car.with_user(owner)
            })
            .collect();
        listed.sort_by_key(|entry| entry.car.id);

        crate::info_with_trace!("Found {} cars", listed.len());
        Ok(listed)
    }

    /// Validate raw input and create a car
    #[instrument(skip(self, input))]
    pub async fn create(&self, input: &CarInput) -> ServiceResult<Car> {
        let request = input.into_create_request(self.policy)?;
        self.create_car(request).await
    }

    /// Create a car from a validated request, taking the owner away from
    /// any car they currently hold
    #[instrument(skip(self, request), fields(name = %request.name, user_id = ?request.user_id))]
    pub async fn create_car(&self, request: CreateCarRequest) -> ServiceResult<Car> {
        crate::info_with_trace!("Creating car");

        let dissociate = match request.user_id {
            Some(user_id) => {
                self.ensure_user_exists(user_id).await?;
                self.cars_owned_by(user_id, None).await?
            }
            None => Vec::new(),
        };

        let dissociated = dissociate.len();
        let car = self.cars.create(request.into(), dissociate).await?;
        self.record_dissociations(dissociated);

        crate::info_with_trace!(car_id = car.id, "Car created, {} dissociated", dissociated);
        Ok(car)
    }

    /// Get a specific car by ID
    #[instrument(skip(self), fields(id = %id))]
    pub async fn show(&self, id: CarId) -> ServiceResult<Car> {
        self.find_car(id).await
    }

    /// Validate raw input and update a car
    #[instrument(skip(self, input), fields(id = %id))]
    pub async fn update(&self, id: CarId, input: &CarInput) -> ServiceResult<Car> {
        // Missing cars take precedence over invalid input
        let car = self.find_car(id).await?;

        let request = input.into_update_request()?;
        self.apply_update(car, request).await
    }

    /// Update a car from a validated request
    #[instrument(skip(self, request), fields(id = %id))]
    pub async fn update_car(&self, id: CarId, request: UpdateCarRequest) -> ServiceResult<Car> {
        let car = self.find_car(id).await?;
        self.apply_update(car, request).await
    }

    async fn apply_update(&self, mut car: Car, request: UpdateCarRequest) -> ServiceResult<Car> {
        let id = car.id;
        crate::info_with_trace!(car_id = id, "Updating car");

        if let Some(car_id) = request.car_id {
            if car_id != id {
                return Err(ValidationErrors::from(car_id_mismatch(id)).into());
            }
        }

        let dissociate = match request.user_id {
            Some(Some(user_id)) => {
                self.ensure_user_exists(user_id).await?;
                self.cars_owned_by(user_id, Some(id)).await?
            }
            _ => Vec::new(),
        };

        if car.apply(&request) {
            crate::info_with_trace!(owner = ?car.user_id, "Car ownership changed");
        }

        let dissociated = dissociate.len();
        let car = self
            .cars
            .update(car, dissociate)
            .await
            .map_err(|e| not_found_as_car(e, id))?;
        self.record_dissociations(dissociated);

        crate::info_with_trace!("Car updated, {} dissociated", dissociated);
        Ok(car)
    }

    /// Delete a car
    #[instrument(skip(self), fields(id = %id))]
    pub async fn destroy(&self, id: CarId) -> ServiceResult<()> {
        crate::info_with_trace!("Deleting car");

        self.cars
            .delete(id)
            .await
            .map_err(|e| not_found_as_car(e, id))?;

        crate::info_with_trace!("Car deleted");
        Ok(())
    }

    /// Validate raw input and reassign a car's owner
    #[instrument(skip(self, input))]
    pub async fn reassign_owner(&self, input: &CarInput) -> ServiceResult<ReassignOwnerResponse> {
        let request = input.into_reassign_request()?;
        self.reassign(request).await
    }

    /// Set the owner of a car without clearing the user's other cars.
    ///
    /// This is the one write path that can leave a user with several cars.
    #[instrument(skip(self), fields(car_id = %request.car_id, user_id = %request.user_id))]
    pub async fn reassign(&self, request: ReassignOwnerRequest) -> ServiceResult<ReassignOwnerResponse> {
        crate::info_with_trace!("Reassigning car owner");

        self.find_car(request.car_id).await?;
        if !self.users.exists(request.user_id).await? {
            crate::warn_with_trace!("User not found");
            return Err(ServiceError::UserNotFound {
                id: request.user_id,
            });
        }

        let car = self
            .cars
            .assign_owner(request.car_id, request.user_id)
            .await
            .map_err(|e| not_found_as_car(e, request.car_id))?;

        Ok(ReassignOwnerResponse { success: true, car })
    }

    async fn find_car(&self, id: CarId) -> ServiceResult<Car> {
        match self.cars.find_by_id(id).await? {
            Some(car) => Ok(car),
            None => {
                crate::warn_with_trace!(car_id = id, "Car not found");
                Err(ServiceError::CarNotFound { id: id.to_string() })
            }
        }
    }

    async fn ensure_user_exists(&self, user_id: UserId) -> ServiceResult<()> {
        if self.users.exists(user_id).await? {
            Ok(())
        } else {
            crate::warn_with_trace!(user_id = user_id, "Referenced user does not exist");
            Err(ValidationErrors::from(unknown_reference(FIELD_USER_ID)).into())
        }
    }

    /// Ids of the cars owned by a user, excluding the record being written
    async fn cars_owned_by(&self, user_id: UserId, except: Option<CarId>) -> ServiceResult<Vec<CarId>> {
        let owned = self.cars.find_by_user(user_id).await?;

        Ok(owned
            .into_iter()
            .filter(|car| car.is_owned_by(user_id) && Some(car.id) != except)
            .map(|car| car.id)
            .collect())
    }

    fn record_dissociations(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_car_dissociations(count);
        }
    }
}

fn not_found_as_car(error: RepositoryError, id: CarId) -> ServiceError {
    match error {
        RepositoryError::NotFound => ServiceError::CarNotFound { id: id.to_string() },
        other => ServiceError::Repository { source: other },
    }
}
