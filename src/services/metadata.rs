//! src/services/metadata.rs
//!
//! MetadataStore: the relational system of record for users, buckets,
//! bucket membership and file rows, backed by SQLite through sqlx. It is the
//! source of truth for what *should* exist; the object store holds the bytes.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::{RngCore, rngs::OsRng};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};

use crate::models::{
    bucket::Bucket,
    file::{FileEntry, FileRecord, NewFile},
    user::User,
};

/// Schema applied by [`MetadataStore::migrate`].
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

const USER_COLUMNS: &str = "id, name, api_token, is_admin, created_at, updated_at";
const BUCKET_COLUMNS: &str = "id, name, created_at, updated_at";
const FILE_COLUMNS: &str = "id, original_name, unique_name, mime_type, size_bytes, \
                            user_id, bucket_id, created_at, updated_at";

pub type MetadataResult<T> = Result<T, sqlx::Error>;

/// Shared handle to the metadata database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MetadataStore {
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the database at `url`.
    pub async fn connect(url: &str) -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = opts.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(sqlx::Error::Io)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Private in-memory database with the schema applied.
    ///
    /// Uses a single pooled connection that never expires, since the
    /// database lives only as long as that connection.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self::new(Arc::new(pool));
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Idempotent. Returns the statement count.
    pub async fn migrate(&self) -> MetadataResult<usize> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in &statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(statements.len())
    }

    pub async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
            .map(|_| ())
    }

    // --- users ---

    pub async fn find_user_by_token(&self, token: &str) -> MetadataResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE api_token = ?"
        ))
        .bind(token)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_user(&self, id: i64) -> MetadataResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Insert a user with a freshly generated API token.
    pub async fn create_user(&self, name: &str, is_admin: bool) -> MetadataResult<User> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, api_token, is_admin, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(generate_token())
        .bind(is_admin)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Replace a user's token. Returns the new token, or `None` for an
    /// unknown user.
    pub async fn regenerate_token(&self, user_id: i64) -> MetadataResult<Option<String>> {
        let token = generate_token();
        let result = sqlx::query("UPDATE users SET api_token = ?, updated_at = ? WHERE id = ?")
            .bind(&token)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&*self.db)
            .await?;
        Ok((result.rows_affected() > 0).then_some(token))
    }

    // --- buckets and membership ---

    pub async fn find_bucket_by_name(&self, name: &str) -> MetadataResult<Option<Bucket>> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_buckets(&self) -> MetadataResult<Vec<Bucket>> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets ORDER BY name"
        ))
        .fetch_all(&*self.db)
        .await
    }

    pub async fn create_bucket(&self, name: &str) -> MetadataResult<Bucket> {
        let now = Utc::now();
        sqlx::query_as::<_, Bucket>(&format!(
            "INSERT INTO buckets (name, created_at, updated_at) VALUES (?, ?, ?)
             RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Grant `user_id` membership of `bucket_id`. Granting twice is a no-op.
    pub async fn add_member(&self, user_id: i64, bucket_id: i64) -> MetadataResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_buckets (user_id, bucket_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(bucket_id)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn is_member(&self, user_id: i64, bucket_id: i64) -> MetadataResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_buckets WHERE user_id = ? AND bucket_id = ?)",
        )
        .bind(user_id)
        .bind(bucket_id)
        .fetch_one(&*self.db)
        .await
    }

    // --- files ---

    pub async fn find_file_in_bucket(
        &self,
        bucket_id: i64,
        key: &str,
    ) -> MetadataResult<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE bucket_id = ? AND unique_name = ?"
        ))
        .bind(bucket_id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await
    }

    /// Look a file up by key, joined to the bucket with the given name and to
    /// its uploader. A key stored in a different bucket does not match.
    pub async fn find_file_entry(
        &self,
        bucket_name: &str,
        key: &str,
    ) -> MetadataResult<Option<FileEntry>> {
        sqlx::query_as::<_, FileEntry>(
            "SELECT f.id, f.original_name, f.unique_name, f.mime_type, f.size_bytes,
                    f.user_id, f.bucket_id, f.created_at, f.updated_at,
                    b.name AS bucket_name, u.name AS uploader_name
             FROM files f
             JOIN buckets b ON b.id = f.bucket_id
             LEFT JOIN users u ON u.id = f.user_id
             WHERE f.unique_name = ? AND b.name = ?",
        )
        .bind(key)
        .bind(bucket_name)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn insert_file(&self, new: &NewFile<'_>) -> MetadataResult<FileRecord> {
        let now = Utc::now();
        sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (original_name, unique_name, mime_type, size_bytes,
                                user_id, bucket_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(new.original_name)
        .bind(new.unique_name)
        .bind(new.mime_type)
        .bind(new.size_bytes)
        .bind(new.user_id)
        .bind(new.bucket_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    /// Overwrite the mutable columns of an existing row after a replace.
    /// `user_id` becomes the caller who replaced the content.
    pub async fn update_file(
        &self,
        id: i64,
        original_name: &str,
        mime_type: &str,
        size_bytes: i64,
        user_id: i64,
    ) -> MetadataResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files
             SET original_name = ?, mime_type = ?, size_bytes = ?, user_id = ?, updated_at = ?
             WHERE id = ?
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(original_name)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(user_id)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn delete_file(&self, id: i64) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_files(&self, bucket_id: i64) -> MetadataResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files WHERE bucket_id = ?")
            .bind(bucket_id)
            .fetch_one(&*self.db)
            .await
    }

    pub async fn list_file_keys(&self, bucket_id: i64) -> MetadataResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT unique_name FROM files WHERE bucket_id = ? ORDER BY unique_name",
        )
        .bind(bucket_id)
        .fetch_all(&*self.db)
        .await
    }
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}
