//! Represents a bucket, the access-control boundary for membership-based sharing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bucket known to the metadata store.
///
/// The name doubles as the object-store bucket identifier, so a row here is
/// only useful while a bucket of the same name exists in the object store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: i64,

    /// Unique bucket name (S3 naming rules).
    pub name: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
