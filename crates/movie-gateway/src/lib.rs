//! HTTP relay in front of The Movie Database.
//!
//! - `GET /tmdb?endpoint=/movie/popular&...` relays a metadata call with the
//!   server's API key injected.
//! - `GET /image?path=/poster.jpg[&size=w342]` streams an image from the CDN.
//! - `GET|POST|DELETE /ratings` reads and edits per-user movie ratings kept in
//!   a JSON file.
//! - `GET /users/new` hands out a fresh user id.

pub mod config;
pub mod error;
pub mod handlers;
pub mod ratings;
pub mod state;

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/tmdb", get(handlers::fetch_metadata))
        .route("/image", get(handlers::fetch_image))
        .route(
            "/ratings",
            get(handlers::read_ratings)
                .post(handlers::write_rating)
                .delete(handlers::delete_rating),
        )
        .route("/users/new", get(handlers::new_user))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser clients on any origin may call every route
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
