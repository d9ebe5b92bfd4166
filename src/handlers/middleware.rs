use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use serde_json::{json, Value};
use tracing::{error, warn};

/// Limits enforced before a request reaches the handlers
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_request_size: usize,
}

/// Request validation middleware
pub async fn request_validation_middleware(
    State(limits): State<RequestLimits>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<Value>)> {
    validate_content_type(request.method(), request.headers())?;
    validate_request_size(request.headers(), limits.max_request_size)?;

    Ok(next.run(request).await)
}

/// Bodies are optional (input may arrive as query parameters), but a body
/// that declares a content type must declare JSON
fn validate_content_type(
    method: &Method,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<Value>)> {
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return Ok(());
    }

    let has_body = content_length(headers).map_or(true, |length| length > 0);
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };

    let content_type = content_type.to_str().unwrap_or("");
    if has_body && !content_type.starts_with("application/json") {
        warn!("Invalid content type: {}", content_type);
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({
                "error": "Unsupported media type",
                "message": "Content-Type must be application/json",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ));
    }

    Ok(())
}

fn validate_request_size(
    headers: &HeaderMap,
    max_request_size: usize,
) -> Result<(), (StatusCode, Json<Value>)> {
    match content_length(headers) {
        Some(length) if length > max_request_size as u64 => {
            error!("Request too large: {} bytes", length);
            Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": "Request too large",
                    "message": format!(
                        "Request size {} bytes exceeds maximum of {} bytes",
                        length, max_request_size
                    ),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            ))
        }
        _ => Ok(()),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// CORS middleware for handling cross-origin requests
pub async fn cors_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );

    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );

    response
}
