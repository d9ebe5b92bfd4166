use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::handlers::{
    admin::{create_admin_router, AdminState},
    api::create_api_router,
    cors_middleware, health_check, metrics_handler, request_validation_middleware,
    security_headers_middleware, RequestLimits,
};
use crate::observability::{observability_middleware, Metrics};
use crate::services::CarService;

/// Assemble the full router.
///
/// Admin routes are mounted only when an [`AdminState`] is supplied.
pub fn create_app(
    car_service: Arc<CarService>,
    metrics: Arc<Metrics>,
    admin_state: Option<AdminState>,
    limits: RequestLimits,
) -> Router {
    let metrics_for_middleware = metrics.clone();

    let mut app = Router::new()
        .route("/health/status", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics.clone())
        .merge(create_api_router(car_service, metrics));

    if let Some(admin_state) = admin_state {
        app = app.merge(create_admin_router(admin_state));
    }

    // Outermost layer is added last
    app.layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .layer(middleware::from_fn_with_state(
            limits,
            request_validation_middleware,
        ))
        .layer(middleware::from_fn(move |req, next| {
            observability_middleware(metrics_for_middleware.clone(), req, next)
        }))
}
