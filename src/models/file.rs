//! Represents a stored file and its metadata record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A single file row.
///
/// `unique_name` is the object key inside the owning bucket; the pair
/// `(bucket_id, unique_name)` is unique across the table.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    pub id: i64,

    /// Name as supplied by the uploader, unsanitized.
    pub original_name: String,

    /// Object key the payload lives under.
    pub unique_name: String,

    pub mime_type: String,
    pub size_bytes: i64,

    /// Uploader (or last replacer) of the file.
    pub user_id: i64,
    pub bucket_id: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A file row joined to its bucket name and uploader display name.
#[derive(Clone, FromRow, Debug)]
pub struct FileEntry {
    #[sqlx(flatten)]
    pub file: FileRecord,
    pub bucket_name: String,
    pub uploader_name: Option<String>,
}

/// Values needed to insert a new file row.
#[derive(Clone, Debug)]
pub struct NewFile<'a> {
    pub original_name: &'a str,
    pub unique_name: &'a str,
    pub mime_type: &'a str,
    pub size_bytes: i64,
    pub user_id: i64,
    pub bucket_id: i64,
}
