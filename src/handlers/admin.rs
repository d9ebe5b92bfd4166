use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::models::{NewUser, RepositoryError};
use crate::repositories::{CarRepository, TableManager, UserRepository};

/// Admin state for table management and demo data
#[derive(Clone)]
pub struct AdminState {
    pub table_manager: Arc<TableManager>,
    pub cars: Arc<dyn CarRepository>,
    pub users: Arc<dyn UserRepository>,
    pub database: DatabaseConfig,
}

/// Response for seeding operations
#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub message: String,
    pub users_created: usize,
    pub timestamp: String,
}

/// Response for cleanup operations
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub cars_deleted: usize,
    pub timestamp: String,
}

/// Response for table setup operations
#[derive(Debug, Serialize)]
pub struct SetupTablesResponse {
    pub message: String,
    pub tables: BTreeMap<String, String>,
    pub timestamp: String,
}

/// Create admin router with database management endpoints
pub fn create_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/admin/setup-tables", post(setup_tables))
        .route("/api/admin/seed", post(seed_database))
        .route("/api/admin/cleanup", post(cleanup_database))
        .with_state(state)
}

/// Create the cars, users and sequences tables if missing
#[instrument(name = "setup_tables", skip(state), fields(
    cars_table = %state.database.cars_table_name,
    users_table = %state.database.users_table_name,
))]
pub async fn setup_tables(
    State(state): State<AdminState>,
) -> Result<Json<SetupTablesResponse>, (StatusCode, Json<Value>)> {
    let database = &state.database;

    info!("Setting up DynamoDB tables");

    state
        .table_manager
        .create_all_tables(
            &database.cars_table_name,
            &database.users_table_name,
            &database.sequences_table_name,
        )
        .await
        .map_err(|err| admin_error("Failed to create tables", err))?;

    let mut tables = BTreeMap::new();
    for table_name in [
        &database.cars_table_name,
        &database.users_table_name,
        &database.sequences_table_name,
    ] {
        let status = state
            .table_manager
            .describe_table(table_name)
            .await
            .map_err(|err| admin_error("Failed to describe tables", err))?
            .unwrap_or_else(|| "MISSING".to_string());
        tables.insert(table_name.clone(), status);
    }

    info!("Tables ready: {:?}", tables);

    Ok(Json(SetupTablesResponse {
        message: format!("{} tables ready", tables.len()),
        tables,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Seed demo users; a users table that already has rows is left alone
#[instrument(name = "seed_database", skip(state), fields(
    users_table = %state.database.users_table_name,
))]
pub async fn seed_database(
    State(state): State<AdminState>,
) -> Result<Json<SeedResponse>, (StatusCode, Json<Value>)> {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let existing = state
        .users
        .count()
        .await
        .map_err(|err| admin_error("Failed to seed database", err))?;

    if existing > 0 {
        info!("Users table already holds {} users, skipping seed", existing);
        return Ok(Json(SeedResponse {
            message: format!("Database already seeded with {} users", existing),
            users_created: 0,
            timestamp,
        }));
    }

    let mut created_count = 0;
    let mut errors = Vec::new();

    for user in sample_users() {
        let email = user.email.clone();
        match state.users.create(user).await {
            Ok(user) => {
                created_count += 1;
                info!("Seeded user {} ({})", user.id, user.email);
            }
            Err(err) => {
                warn!("Failed to seed user {}: {}", email, err);
                errors.push(format!("{}: {}", email, err));
            }
        }
    }

    if created_count == 0 && !errors.is_empty() {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to seed database",
                "details": errors,
                "timestamp": timestamp,
            })),
        ));
    }

    let message = if errors.is_empty() {
        format!("Database seeded with {} users", created_count)
    } else {
        format!(
            "Database seeded with {} users, {} errors occurred",
            created_count,
            errors.len()
        )
    };

    Ok(Json(SeedResponse {
        message,
        users_created: created_count,
        timestamp,
    }))
}

/// Delete every car (workshop reset); users are kept
#[instrument(name = "cleanup_database", skip(state), fields(
    cars_table = %state.database.cars_table_name,
))]
pub async fn cleanup_database(
    State(state): State<AdminState>,
) -> Result<Json<CleanupResponse>, (StatusCode, Json<Value>)> {
    let cars = state
        .cars
        .find_all()
        .await
        .map_err(|err| admin_error("Failed to cleanup database", err))?;

    let mut deleted_count = 0;
    for car in cars {
        match state.cars.delete(car.id).await {
            Ok(()) => deleted_count += 1,
            // Deleted concurrently
            Err(RepositoryError::NotFound) => {}
            Err(err) => return Err(admin_error("Failed to cleanup database", err)),
        }
    }

    info!("Deleted {} cars", deleted_count);

    Ok(Json(CleanupResponse {
        message: format!("Deleted {} cars", deleted_count),
        cars_deleted: deleted_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

fn admin_error(context: &str, err: RepositoryError) -> (StatusCode, Json<Value>) {
    error!("{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": context,
            "message": err.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

fn sample_users() -> Vec<NewUser> {
    [
        ("Ada Lovelace", "ada@example.com"),
        ("Alan Turing", "alan@example.com"),
        ("Grace Hopper", "grace@example.com"),
        ("Edsger Dijkstra", "edsger@example.com"),
        ("Barbara Liskov", "barbara@example.com"),
    ]
    .into_iter()
    .map(|(name, email)| NewUser {
        name: name.to_string(),
        email: email.to_string(),
    })
    .collect()
}
