//! HTTP routes

pub mod health;
pub mod upload;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::services::ServeFile;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let landing = ServeFile::new(&state.config().upload.index_file);
    let body_limit = state.config().upload.max_request_bytes;

    Router::new()
        .route_service("/", landing)
        .route("/health", get(health::health_check))
        .route("/upload", upload::route())
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(short_circuit_options))
        .layer(cors_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .layer(cors_header(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "GET, POST, PUT, DELETE, OPTIONS",
        ))
        .layer(cors_header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
        .layer(cors_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// tower-http's CorsLayer refuses a wildcard origin together with credentials,
// so the headers are set directly.
fn cors_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

/// Answer every OPTIONS request with an empty 200
async fn short_circuit_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}
