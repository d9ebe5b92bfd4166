use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{User, UserId};

pub type CarId = u64;

/// Core car record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub name: String,
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Car fields supplied by the caller; id and timestamps are assigned on write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCar {
    pub name: String,
    pub user_id: Option<UserId>,
}

/// Validated input for creating a car
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCarRequest {
    pub name: String,
    pub user_id: Option<UserId>,
}

/// Validated input for updating a car.
///
/// `user_id` is tri-state: `None` leaves ownership untouched, `Some(None)`
/// unassigns the car and `Some(Some(id))` assigns it to a user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateCarRequest {
    pub name: Option<String>,
    pub user_id: Option<Option<UserId>>,
    pub car_id: Option<CarId>,
}

/// Validated input for the unchecked owner reassignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignOwnerRequest {
    pub car_id: CarId,
    pub user_id: UserId,
}

/// Car with its owner expanded, as returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarWithUser {
    #[serde(flatten)]
    pub car: Car,
    pub user: Option<User>,
}

/// Response body of the owner reassignment endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignOwnerResponse {
    pub success: bool,
    pub car: Car,
}

/// Whether a car must name its owner on creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    #[default]
    OptionalOwner,
    RequiredOwner,
}

impl OwnershipPolicy {
    pub fn from_flag(require_user_id: bool) -> Self {
        if require_user_id {
            OwnershipPolicy::RequiredOwner
        } else {
            OwnershipPolicy::OptionalOwner
        }
    }

    pub fn requires_owner(self) -> bool {
        matches!(self, OwnershipPolicy::RequiredOwner)
    }
}

impl Car {
    /// Build a stored car from caller fields and store-assigned metadata
    pub fn from_new(id: CarId, new_car: NewCar, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new_car.name,
            user_id: new_car.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update request, returning true when ownership changes
    pub fn apply(&mut self, request: &UpdateCarRequest) -> bool {
        if let Some(name) = &request.name {
            self.name = name.clone();
        }

        match request.user_id {
            Some(user_id) if user_id != self.user_id => {
                self.user_id = user_id;
                true
            }
            _ => false,
        }
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }

    pub fn with_user(self, user: Option<User>) -> CarWithUser {
        CarWithUser { car: self, user }
    }
}

impl From<CreateCarRequest> for NewCar {
    fn from(request: CreateCarRequest) -> Self {
        Self {
            name: request.name,
            user_id: request.user_id,
        }
    }
}
