use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod json_file;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Ratings file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ratings file is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Ratings update task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A single score. Integers keep their integer form on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_rating: Number,
}

impl Rating {
    pub fn new(user_rating: Number) -> Self {
        Self { user_rating }
    }
}

/// movie_id -> rating. An unrated movie has no entry.
pub type UserRatings = BTreeMap<String, Rating>;

/// user_id -> ratings, the root of the persisted file
pub type RatingsDatabase = BTreeMap<String, UserRatings>;

/// Interpret a submitted rating. Anything that is not a finite number
/// (absent, null, text, bool) means "remove the rating".
pub fn parse_rating(value: Option<&Value>) -> Option<Number> {
    match value? {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Some(Number::from(n));
            }
            s.parse::<f64>().ok().and_then(Number::from_f64)
        }
        _ => None,
    }
}

/// Per-user movie ratings storage
#[async_trait]
pub trait RatingsStore: Send + Sync {
    /// All ratings of a user; empty for an unknown user
    async fn get_ratings(&self, user_id: &str) -> Result<UserRatings, StorageError>;

    /// Set a rating, or remove it when `rating` is `None`
    async fn upsert_rating(
        &self,
        user_id: &str,
        movie_id: &str,
        rating: Option<Number>,
    ) -> Result<(), StorageError>;

    /// Remove a rating; removing an absent rating is not an error
    async fn delete_rating(&self, user_id: &str, movie_id: &str) -> Result<(), StorageError>;
}

/// Apply an upsert to an in-memory database. Returns whether anything changed.
pub(crate) fn apply_upsert(
    db: &mut RatingsDatabase,
    user_id: &str,
    movie_id: &str,
    rating: Option<Number>,
) -> bool {
    match rating {
        Some(user_rating) => {
            let rating = Rating::new(user_rating);
            let ratings = db.entry(user_id.to_string()).or_default();
            if ratings.get(movie_id) == Some(&rating) {
                return false;
            }
            ratings.insert(movie_id.to_string(), rating);
            true
        }
        None => apply_delete(db, user_id, movie_id),
    }
}

pub(crate) fn apply_delete(db: &mut RatingsDatabase, user_id: &str, movie_id: &str) -> bool {
    let Some(ratings) = db.get_mut(user_id) else {
        return false;
    };
    let removed = ratings.remove(movie_id).is_some();
    if ratings.is_empty() {
        db.remove(user_id);
    }
    removed
}
