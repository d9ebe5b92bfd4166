use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::models::{
    Car, CarId, CarInput, CarWithUser, ReassignOwnerResponse, RepositoryError, ServiceError,
};
use crate::observability::Metrics;
use crate::services::CarService;

type ApiError = (StatusCode, Json<Value>);

/// Shared application state for the car endpoints
#[derive(Clone)]
pub struct ApiState {
    pub car_service: Arc<CarService>,
    pub metrics: Arc<Metrics>,
}

/// Create API router with all car endpoints
pub fn create_api_router(car_service: Arc<CarService>, metrics: Arc<Metrics>) -> Router {
    let state = ApiState {
        car_service,
        metrics,
    };

    Router::new()
        .route("/api/cars", get(list_cars).post(create_car))
        .route(
            "/api/cars/:id",
            get(show_car).put(update_car).delete(destroy_car),
        )
        .route("/api/update-car-user", put(reassign_car_owner))
        .with_state(state)
}

/// List all cars with their owners
#[instrument(name = "list_cars", skip(state))]
pub async fn list_cars(State(state): State<ApiState>) -> Result<Json<Vec<CarWithUser>>, ApiError> {
    let result = state.car_service.list().await;
    state.metrics.record_car_operation("list", result.is_ok());

    match result {
        Ok(cars) => Ok(Json(cars)),
        Err(err) => {
            error!("Failed to list cars: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// Create a car from query parameters and/or a JSON body
#[instrument(name = "create_car", skip(state, query, body))]
pub async fn create_car(
    State(state): State<ApiState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Car>), ApiError> {
    let input = car_input(query, &body)?;

    let result = state.car_service.create(&input).await;
    state.metrics.record_car_operation("create", result.is_ok());

    match result {
        Ok(car) => {
            crate::info_with_trace!(car_id = car.id, "Car created");
            Ok((StatusCode::CREATED, Json(car)))
        }
        Err(err) => {
            warn!("Failed to create car: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// Get a specific car by ID
#[instrument(name = "show_car", skip(state), fields(car_id = %id))]
pub async fn show_car(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Car>, ApiError> {
    let id = parse_car_id(&id)?;

    let result = state.car_service.show(id).await;
    state.metrics.record_car_operation("show", result.is_ok());

    result.map(Json).map_err(|err| {
        info!("Failed to get car {}: {}", id, err);
        service_error_to_response(err)
    })
}

/// Update a car's name and/or owner
#[instrument(name = "update_car", skip(state, query, body), fields(car_id = %id))]
pub async fn update_car(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Car>, ApiError> {
    let id = parse_car_id(&id)?;
    let input = car_input(query, &body)?;

    let result = state.car_service.update(id, &input).await;
    state.metrics.record_car_operation("update", result.is_ok());

    result.map(Json).map_err(|err| {
        warn!("Failed to update car {}: {}", id, err);
        service_error_to_response(err)
    })
}

/// Delete a car
#[instrument(name = "destroy_car", skip(state), fields(car_id = %id))]
pub async fn destroy_car(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_car_id(&id)?;

    let result = state.car_service.destroy(id).await;
    state.metrics.record_car_operation("destroy", result.is_ok());

    match result {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(err) => {
            warn!("Failed to delete car {}: {}", id, err);
            Err(service_error_to_response(err))
        }
    }
}

/// Set a car's owner without touching the user's other cars.
///
/// Every failure, including validation and missing records, is a 400.
#[instrument(name = "reassign_car_owner", skip(state, query, body))]
pub async fn reassign_car_owner(
    State(state): State<ApiState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<ReassignOwnerResponse>, ApiError> {
    let input = car_input(query, &body).map_err(|(_, body)| (StatusCode::BAD_REQUEST, body))?;

    let result = state.car_service.reassign_owner(&input).await;
    state.metrics.record_car_operation("reassign_owner", result.is_ok());

    result.map(Json).map_err(|err| {
        warn!("Failed to reassign car owner: {}", err);
        reassign_error_to_response(err)
    })
}

/// Merge query parameters with an optional JSON object body
fn car_input(query: HashMap<String, String>, body: &[u8]) -> Result<CarInput, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CarInput::from_parts(query, None));
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(CarInput::from_parts(query, Some(fields))),
        Ok(Value::Null) => Ok(CarInput::from_parts(query, Some(Map::new()))),
        Ok(_) => Err(bad_request("Request body must be a JSON object")),
        Err(e) => {
            warn!("Malformed JSON body: {}", e);
            Err(bad_request("Malformed JSON body"))
        }
    }
}

/// Ids that cannot name a car are reported the same way as missing cars
fn parse_car_id(raw: &str) -> Result<CarId, ApiError> {
    raw.parse::<CarId>().map_err(|_| {
        service_error_to_response(ServiceError::CarNotFound {
            id: raw.to_string(),
        })
    })
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Convert service errors to HTTP responses
pub fn service_error_to_response(err: ServiceError) -> ApiError {
    let (status, message) = match err {
        ServiceError::Validation { errors } => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": errors.first_message().unwrap_or("The given data was invalid."),
                    "errors": errors,
                })),
            );
        }
        ServiceError::CarNotFound { .. } | ServiceError::UserNotFound { .. } => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        ServiceError::Repository { source } => match source {
            RepositoryError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            RepositoryError::ConnectionFailed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Database connection failed".to_string(),
            ),
            RepositoryError::Timeout => {
                (StatusCode::GATEWAY_TIMEOUT, "Database timeout".to_string())
            }
            RepositoryError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        },
    };

    (
        status,
        Json(json!({
            "error": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

fn reassign_error_to_response(err: ServiceError) -> ApiError {
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    match err {
        ServiceError::Validation { errors } => {
            body["error"] = json!(errors.first_message().unwrap_or("The given data was invalid."));
            body["errors"] = json!(errors);
        }
        ServiceError::Repository { .. } => {
            body["error"] = json!("Failed to update car owner");
        }
        _ => {}
    }

    (StatusCode::BAD_REQUEST, Json(body))
}
