use super::{apply_delete, apply_upsert, RatingsDatabase, RatingsStore, StorageError, UserRatings};
use async_trait::async_trait;
use fd_lock::RwLock;
use serde_json::Number;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

/// Ratings store backed by a single JSON file.
///
/// Every operation goes back to the file, so external edits are picked up.
/// Mutations run load, modify and store while holding an exclusive advisory
/// lock on a sibling `<file>.lock`, which serializes writers across
/// processes as well as across store instances. `write_lock` only keeps
/// writers of this instance from queueing up on the blocking pool.
///
/// Each write goes to its own temp file in the same directory and is renamed
/// over the target, so readers never take a lock and never see a
/// half-written file.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole database without locking.
    async fn load(&self) -> Result<RatingsDatabase, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RatingsDatabase::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `change` under both locks; the file is only rewritten when
    /// `change` reports a modification.
    async fn update<F>(&self, change: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut RatingsDatabase) -> bool + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || update_locked(&path, change)).await?
    }
}

/// A missing or blank file is an empty database.
fn decode(bytes: &[u8]) -> Result<RatingsDatabase, StorageError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RatingsDatabase::new());
    }
    serde_json::from_slice(bytes).map_err(StorageError::Corrupt)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("ratings"));
    name.push(".lock");
    path.with_file_name(name)
}

/// Blocking load-modify-store under the cross-process file lock.
fn update_locked<F>(path: &Path, change: F) -> Result<bool, StorageError>
where
    F: FnOnce(&mut RatingsDatabase) -> bool,
{
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;

    // the lock file is never replaced, unlike the data file
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))?;
    let mut lock = RwLock::new(lock_file);
    let _held = lock.write()?;

    let mut db = match fs::read(path) {
        Ok(bytes) => decode(&bytes)?,
        Err(e) if e.kind() == ErrorKind::NotFound => RatingsDatabase::new(),
        Err(e) => return Err(e.into()),
    };

    let changed = change(&mut db);
    if changed {
        store(path, dir, &db)?;
    }

    Ok(changed)
}

/// Write `db` to a fresh temp file in `dir`, flush it to disk, then rename
/// it over `path`. The temp file is removed if any step fails.
fn store(path: &Path, dir: &Path, db: &RatingsDatabase) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(db).map_err(StorageError::Serialization)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(
        path = %path.display(),
        users = db.len(),
        bytes = bytes.len(),
        "Ratings file written"
    );

    Ok(())
}

#[async_trait]
impl RatingsStore for JsonFileStore {
    async fn get_ratings(&self, user_id: &str) -> Result<UserRatings, StorageError> {
        let mut db = self.load().await?;
        Ok(db.remove(user_id).unwrap_or_default())
    }

    async fn upsert_rating(
        &self,
        user_id: &str,
        movie_id: &str,
        rating: Option<Number>,
    ) -> Result<(), StorageError> {
        let removal = rating.is_none();
        let (user, movie) = (user_id.to_string(), movie_id.to_string());
        let changed = self
            .update(move |db| apply_upsert(db, &user, &movie, rating))
            .await?;

        tracing::info!(
            user_id = %user_id,
            movie_id = %movie_id,
            removal,
            changed,
            "Rating upserted"
        );

        Ok(())
    }

    async fn delete_rating(&self, user_id: &str, movie_id: &str) -> Result<(), StorageError> {
        let (user, movie) = (user_id.to_string(), movie_id.to_string());
        let changed = self
            .update(move |db| apply_delete(db, &user, &movie))
            .await?;

        tracing::info!(
            user_id = %user_id,
            movie_id = %movie_id,
            changed,
            "Rating deleted"
        );

        Ok(())
    }
}
