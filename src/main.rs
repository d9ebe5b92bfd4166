use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use carhub_rs::{
    create_app,
    handlers::{admin::AdminState, RequestLimits},
    init_observability,
    observability::Metrics,
    repositories::{
        CarRepository, DynamoDbCarRepository, DynamoDbIdSequence, DynamoDbStore,
        DynamoDbUserRepository, TableManager, UserRepository,
    },
    services::CarService,
    shutdown_observability, Config,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_environment()?;

    init_observability(&config.observability)?;

    info!("Starting carhub-rs service");
    info!(
        "Service: {} v{}",
        config.observability.service_name, config.observability.service_version
    );
    info!("Region: {}", config.database.region);
    info!(
        "DynamoDB Tables: cars={}, users={}, sequences={}",
        config.database.cars_table_name,
        config.database.users_table_name,
        config.database.sequences_table_name
    );

    let metrics = Arc::new(Metrics::new()?);
    info!("Metrics initialized successfully");

    let dynamodb_client = Arc::new(config.database.dynamodb_client().await);
    let store = DynamoDbStore::new(dynamodb_client.clone(), config.database.region.clone())
        .with_metrics(metrics.clone());
    let sequence =
        DynamoDbIdSequence::new(store.clone(), config.database.sequences_table_name.clone());
    info!("AWS clients initialized successfully");

    let table_manager = Arc::new(TableManager::new(dynamodb_client));

    let car_repository: Arc<dyn CarRepository> = Arc::new(DynamoDbCarRepository::new(
        store.clone(),
        config.database.cars_table_name.clone(),
        sequence.clone(),
    ));
    let user_repository: Arc<dyn UserRepository> = Arc::new(DynamoDbUserRepository::new(
        store,
        config.database.users_table_name.clone(),
        sequence,
    ));
    info!("Repositories initialized successfully");

    let car_service = Arc::new(
        CarService::new(
            car_repository.clone(),
            user_repository.clone(),
            config.ownership.policy(),
        )
        .with_metrics(metrics.clone()),
    );
    info!(
        "Services initialized successfully (ownership policy: {:?})",
        car_service.policy()
    );

    let admin_state = AdminState {
        table_manager,
        cars: car_repository,
        users: user_repository,
        database: config.database.clone(),
    };

    let app = create_app(
        car_service,
        metrics,
        Some(admin_state),
        RequestLimits {
            max_request_size: config.server.max_request_size,
        },
    )
    .layer(tower_http::timeout::TimeoutLayer::new(
        config.server.request_timeout(),
    ));

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_observability().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
