#![allow(dead_code)]

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use movie_gateway::{config::Config, ratings::json_file::JsonFileStore, state::AppState};
use reqwest::Url;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tmdb_transport::{ApiKey, Endpoints};

pub const API_KEY: &str = "server-held-test-key";

/// A tiny JPEG-shaped payload with bytes that are not valid UTF-8
pub const POSTER: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x80, 0xFE, 0xFF, 0xD9,
];

/// Stub TMDb: API under `/3`, images under `/t/p`. Counts every request.
pub struct Upstream {
    pub base: String,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/3/movie/popular", get(echo_query))
            .route(
                "/3/movie/missing",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({"status_code": 34, "status_message": "not found"})),
                    )
                }),
            )
            .route(
                "/3/movie/garbled",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{\"results\": [") }),
            )
            .route(
                "/3/movie/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({}))
                }),
            )
            .route("/t/p/w500/poster.jpg", get(poster))
            .route("/t/p/w185/poster.jpg", get(poster))
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits));

        let base = serve(app).await;
        Self { base, hits }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn count_hits(State(hits): State<Arc<AtomicUsize>>, request: Request, next: Next) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

async fn echo_query(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    Json(json!({"page": 1, "results": [{"id": 603, "title": "The Matrix"}], "query": params}))
}

async fn poster() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "max-age=31536000"),
        ],
        POSTER,
    )
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// An address nothing listens on
pub fn closed_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    format!("http://{}", listener.local_addr().unwrap())
}

pub fn config_for(upstream_base: &str, ratings_path: PathBuf) -> Config {
    Config {
        api_key: ApiKey::new(API_KEY),
        port: 0,
        ratings_path,
        endpoints: Endpoints {
            api_base: Url::parse(&format!("{upstream_base}/3")).unwrap(),
            image_base: Url::parse(&format!("{upstream_base}/t/p")).unwrap(),
            image_size: "w500".to_string(),
        },
        request_timeout_secs: 1,
        connect_timeout_secs: 1,
    }
}

/// Run the gateway against `upstream_base`; returns its base URL
pub async fn start_gateway(upstream_base: &str, ratings_path: PathBuf) -> String {
    let config = config_for(upstream_base, ratings_path.clone());
    let store = Arc::new(JsonFileStore::new(ratings_path));
    let state = Arc::new(AppState::new(&config, store).unwrap());
    serve(movie_gateway::router(state)).await
}
