#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::net::TcpListener;

use carhub_rs::{
    create_app,
    handlers::RequestLimits,
    models::{Car, CarId, NewCar, NewUser, OwnershipPolicy, RepositoryError, User, UserId},
    repositories::{CarRepository, UserRepository},
    services::CarService,
    Metrics,
};

/// Car store kept in memory, mirroring the DynamoDB repository's semantics
#[derive(Default)]
pub struct InMemoryCarRepository {
    cars: Mutex<BTreeMap<CarId, Car>>,
    next_id: Mutex<CarId>,
}

impl InMemoryCarRepository {
    pub fn snapshot(&self) -> Vec<Car> {
        self.cars.lock().unwrap().values().cloned().collect()
    }

    fn clear_owners(cars: &mut BTreeMap<CarId, Car>, ids: &[CarId]) {
        let now = Utc::now();
        for id in ids {
            if let Some(car) = cars.get_mut(id) {
                car.user_id = None;
                car.updated_at = now;
            }
        }
    }
}

#[async_trait]
impl CarRepository for InMemoryCarRepository {
    async fn find_all(&self) -> Result<Vec<Car>, RepositoryError> {
        Ok(self.snapshot())
    }

    async fn find_by_id(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        Ok(self.cars.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Car>, RepositoryError> {
        Ok(self
            .cars
            .lock()
            .unwrap()
            .values()
            .filter(|car| car.is_owned_by(user_id))
            .cloned()
            .collect())
    }

    async fn create(&self, car: NewCar, dissociate: Vec<CarId>) -> Result<Car, RepositoryError> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            *next_id
        };

        let mut cars = self.cars.lock().unwrap();
        Self::clear_owners(&mut cars, &dissociate);

        let car = Car::from_new(id, car, Utc::now());
        cars.insert(id, car.clone());
        Ok(car)
    }

    async fn update(&self, mut car: Car, dissociate: Vec<CarId>) -> Result<Car, RepositoryError> {
        let mut cars = self.cars.lock().unwrap();
        if !cars.contains_key(&car.id) {
            return Err(RepositoryError::NotFound);
        }

        Self::clear_owners(&mut cars, &dissociate);

        car.updated_at = Utc::now();
        cars.insert(car.id, car.clone());
        Ok(car)
    }

    async fn assign_owner(&self, id: CarId, user_id: UserId) -> Result<Car, RepositoryError> {
        let mut cars = self.cars.lock().unwrap();
        let car = cars.get_mut(&id).ok_or(RepositoryError::NotFound)?;

        car.user_id = Some(user_id);
        car.updated_at = Utc::now();
        Ok(car.clone())
    }

    async fn delete(&self, id: CarId) -> Result<(), RepositoryError> {
        self.cars
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.cars.lock().unwrap().len())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<BTreeMap<UserId, User>>,
}

impl InMemoryUserRepository {
    /// Repository pre-populated with users `1..=count`
    pub fn with_users(count: u64) -> Self {
        let now = Utc::now();
        let users = (1..=count)
            .map(|id| {
                let user = User::from_new(
                    id,
                    NewUser {
                        name: format!("User {}", id),
                        email: format!("user{}@example.com", id),
                    },
                    now,
                );
                (id, user)
            })
            .collect();

        Self {
            users: Mutex::new(users),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: Vec<UserId>) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.lock().unwrap();
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        Ok(self.users.lock().unwrap().contains_key(&id))
    }

    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut users = self.users.lock().unwrap();
        let id = users.keys().next_back().copied().unwrap_or(0) + 1;
        let user = User::from_new(id, user, Utc::now());
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.users.lock().unwrap().len())
    }
}

/// Build a service over fresh in-memory stores holding users `1..=users`
pub fn car_service(
    users: u64,
    policy: OwnershipPolicy,
) -> (CarService, Arc<InMemoryCarRepository>) {
    let cars = Arc::new(InMemoryCarRepository::default());
    let service = CarService::new(
        cars.clone(),
        Arc::new(InMemoryUserRepository::with_users(users)),
        policy,
    );
    (service, cars)
}

pub struct TestEnvironment {
    pub client: Client,
    pub base_url: String,
    pub cars: Arc<InMemoryCarRepository>,
    pub metrics: Arc<Metrics>,
}

impl TestEnvironment {
    /// Serve the real router over in-memory stores with three users
    pub async fn new() -> Self {
        Self::with_policy(OwnershipPolicy::OptionalOwner).await
    }

    pub async fn with_policy(policy: OwnershipPolicy) -> Self {
        let metrics = Arc::new(Metrics::new().expect("Failed to create metrics"));
        let (service, cars) = car_service(3, policy);
        let service = Arc::new(service.with_metrics(metrics.clone()));

        let app = create_app(
            service,
            metrics.clone(),
            None,
            RequestLimits {
                max_request_size: 64 * 1024,
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get local address");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Failed to serve app");
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            client: Client::new(),
            base_url,
            cars,
            metrics,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
