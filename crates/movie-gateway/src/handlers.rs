use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tmdb_transport::UpstreamError;
use tracing::instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::ratings::{parse_rating, UserRatings};
use crate::state::AppState;

/// Upstream headers worth keeping on a relayed image
const IMAGE_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CACHE_CONTROL,
];

#[derive(Deserialize)]
pub struct ImageQuery {
    path: Option<String>,
    size: Option<String>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RatingKeyQuery {
    user_id: Option<String>,
    movie_id: Option<String>,
}

#[derive(Deserialize)]
pub struct WriteRatingRequest {
    user_id: Option<String>,
    movie_id: Option<Value>,
    user_rating: Option<Value>,
}

#[derive(Serialize)]
pub struct Ack {
    success: bool,
}

impl Ack {
    fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Serialize)]
pub struct NewUser {
    user_id: Uuid,
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::missing(name))
}

/// Movie ids arrive as JSON strings or integers
fn movie_id(value: Option<Value>) -> Result<String, AppError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        _ => Err(AppError::missing("movie_id")),
    }
}

/// Pull the endpoint out of the query, leaving the parameters to forward.
/// `url` is accepted for older clients.
fn split_endpoint(params: Vec<(String, String)>) -> Result<(String, Vec<(String, String)>), AppError> {
    let mut endpoint = None;
    let mut legacy = None;
    let mut forward = Vec::with_capacity(params.len());

    for (key, value) in params {
        match key.as_str() {
            "endpoint" => endpoint = Some(value),
            "url" => legacy = Some(value),
            _ => forward.push((key, value)),
        }
    }

    let endpoint = required(endpoint.or(legacy), "endpoint")?;
    Ok((endpoint, forward))
}

/// Relay a TMDb metadata call, e.g. `/tmdb?endpoint=/movie/popular&page=2`
#[instrument(skip_all, fields(endpoint))]
pub async fn fetch_metadata(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    let (endpoint, params) = split_endpoint(params)?;
    tracing::Span::current().record("endpoint", endpoint.as_str());

    let data = state.tmdb.fetch_metadata(&endpoint, &params).await?;
    Ok(Json(data))
}

/// Stream a poster or backdrop from the image CDN.
///
/// An upstream failure status is passed through with an empty body.
#[instrument(skip_all, fields(path))]
pub async fn fetch_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, AppError> {
    let path = required(query.path, "path")?;
    tracing::Span::current().record("path", path.as_str());

    let upstream = match state.tmdb.fetch_image(&path, query.size.as_deref()).await {
        Ok(resp) => resp,
        Err(UpstreamError::Status(status)) => return Ok(status.into_response()),
        Err(e) => return Err(e.into()),
    };

    let mut headers = HeaderMap::new();
    for name in IMAGE_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }

    let body = Body::from_stream(upstream.bytes_stream().map_err(|e| e.without_url()));
    Ok((headers, body).into_response())
}

#[instrument(skip_all, fields(user_id))]
pub async fn read_ratings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UserRatings>, AppError> {
    let user_id = required(query.user_id, "user_id")?;
    tracing::Span::current().record("user_id", user_id.as_str());

    let ratings = state.ratings.get_ratings(&user_id).await?;
    Ok(Json(ratings))
}

/// Set a rating; a missing or non-numeric `user_rating` removes it
#[instrument(skip_all, fields(body_size))]
pub async fn write_rating(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, AppError> {
    tracing::Span::current().record("body_size", body.len());

    let request: WriteRatingRequest =
        serde_json::from_slice(&body).map_err(AppError::MalformedBody)?;

    let user_id = required(request.user_id, "user_id")?;
    let movie_id = movie_id(request.movie_id)?;
    let rating = parse_rating(request.user_rating.as_ref());

    state
        .ratings
        .upsert_rating(&user_id, &movie_id, rating)
        .await?;

    Ok(Ack::ok())
}

#[instrument(skip_all)]
pub async fn delete_rating(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RatingKeyQuery>,
) -> Result<Json<Ack>, AppError> {
    let user_id = required(query.user_id, "user_id")?;
    let movie_id = required(query.movie_id, "movie_id")?;

    state.ratings.delete_rating(&user_id, &movie_id).await?;

    Ok(Ack::ok())
}

/// Issue a fresh user id. Nothing is recorded until the first rating.
pub async fn new_user() -> Json<NewUser> {
    let user_id = Uuid::new_v4();
    tracing::debug!(user_id = %user_id, "Issued new user id");
    Json(NewUser { user_id })
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}
