//! src/services/file_service.rs
//!
//! FileService sequences identity, access policy, naming, the metadata
//! store and the object store into the four public operations: upload,
//! delete, info and download.
//!
//! Nothing here spans both stores atomically. Mutations always touch the
//! object store first and the metadata store second, so a failure or crash in
//! between can leave an object without a row (upload) or a row whose object
//! is already gone (delete). Both cases are logged at warn level and are what
//! `reconcile::audit` reports.
//!
//! Concurrent replace uploads of a key with no row both write the object
//! and race to insert; the loser adopts the winner's row as an update. The
//! object holds whichever payload was published last.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    errors::{AppError, AppResult},
    models::{
        bucket::Bucket,
        file::{FileEntry, FileRecord, NewFile},
        user::Identity,
    },
    services::{
        metadata::MetadataStore,
        naming::{
            generated_name, join_key, resolve_unique_key, sanitize_filename, sanitize_path,
        },
        object_store::{ObjectError, ObjectStore, ObjectStream, PutMode},
        policy::AccessPolicy,
    },
};

/// How many times a non-replace upload re-probes after losing a key race.
const MAX_CREATE_ATTEMPTS: u32 = 8;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Handles shared by every request. Built once at startup.
#[derive(Clone)]
pub struct FileService {
    pub metadata: MetadataStore,
    pub objects: Arc<dyn ObjectStore>,
    /// Prefix for public URLs: `<base>/<bucket>/<key>`.
    pub public_url_base: String,
}

/// The uploaded part of a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub bucket_name: Option<String>,
    pub path: Option<String>,
    pub file: Option<UploadedFile>,
    /// Overwrite the key in place instead of picking a collision-free one.
    pub replace: bool,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file: FileRecord,
    pub bucket_name: String,
    pub url: String,
    /// True when a new row was inserted, false when one was updated.
    pub created: bool,
}

/// `(bucket, path)` pair naming an existing file. Both are required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocator {
    pub bucket_name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub entry: FileEntry,
    pub url: String,
}

/// An authorized, opened download.
pub struct Download {
    /// Sanitized original name for `Content-Disposition`.
    pub file_name: String,
    pub mime_type: String,
    /// Size as reported by the object store, not the metadata row.
    pub size: u64,
    pub stream: ObjectStream,
}

impl FileService {
    pub fn new(
        metadata: MetadataStore,
        objects: Arc<dyn ObjectStore>,
        public_url_base: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            objects,
            public_url_base: public_url_base.into(),
        }
    }

    pub fn policy(&self) -> AccessPolicy<'_> {
        AccessPolicy::new(&self.metadata)
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_url_base.trim_end_matches('/'),
            bucket,
            key
        )
    }

    /// Store a payload and create or update its file row.
    pub async fn upload(&self, identity: &Identity, req: UploadRequest) -> AppResult<UploadOutcome> {
        let Some(file) = req.file else {
            return Err(
                AppError::invalid_request("No file sent (field 'file' is required).")
                    .with_code("FILE_MISSING"),
            );
        };
        let Some(bucket_name) = non_empty(req.bucket_name) else {
            return Err(AppError::invalid_request(
                "Bucket name not provided (field 'bucketName' is required).",
            )
            .with_code("BUCKET_NAME_MISSING"));
        };

        let bucket = self
            .metadata
            .find_bucket_by_name(&bucket_name)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Bucket \"{bucket_name}\" not found or not allowed."))
                    .with_code("BUCKET_NOT_FOUND")
            })?;

        if !self.policy().can_write(identity, &bucket).await? {
            return Err(
                AppError::forbidden("User is not allowed to upload to this bucket.")
                    .with_code("UPLOAD_FORBIDDEN"),
            );
        }

        if !self.objects.bucket_exists(&bucket.name).await? {
            warn!(bucket = %bucket.name, "bucket known to metadata is missing from object store");
            return Err(ObjectError::BucketNotFound(bucket.name.clone()).into());
        }

        let prefix = sanitize_path(req.path.as_deref().unwrap_or_default());
        let original_name = file.original_name.unwrap_or_default();
        let file_name = sanitize_filename(&original_name).unwrap_or_else(|| {
            let generated = generated_name(&original_name);
            warn!(original = %original_name, generated = %generated, "file name empty after sanitizing");
            generated
        });
        let desired = join_key(&prefix, &file_name);
        let mime_type = non_empty(file.content_type).unwrap_or_else(|| DEFAULT_MIME_TYPE.into());
        let size_bytes = file.data.len() as i64;

        let (key, existing) = if req.replace {
            let existing = self.metadata.find_file_in_bucket(bucket.id, &desired).await?;
            self.objects
                .put(&bucket.name, &desired, file.data, &mime_type, PutMode::Overwrite)
                .await?;
            (desired, existing)
        } else {
            let key = self
                .put_with_fresh_key(&bucket, &desired, file.data, &mime_type)
                .await?;
            (key, None)
        };

        let row = NewFile {
            original_name: &original_name,
            unique_name: &key,
            mime_type: &mime_type,
            size_bytes,
            user_id: identity.id,
            bucket_id: bucket.id,
        };
        let written = match &existing {
            Some(current) => self.update_row(current.id, &row).await.map(|r| (r, false)),
            None => match self.metadata.insert_file(&row).await {
                Err(err) if req.replace && is_unique_violation(&err) => {
                    debug!(bucket = %bucket.name, key = %key, "row inserted concurrently, updating it");
                    match self.metadata.find_file_in_bucket(bucket.id, &key).await {
                        Ok(Some(current)) => {
                            self.update_row(current.id, &row).await.map(|r| (r, false))
                        }
                        Ok(None) => Err(err),
                        Err(lookup) => Err(lookup),
                    }
                }
                inserted => inserted.map(|r| (r, true)),
            },
        };
        let (record, created) = written.map_err(|err| {
            warn!(
                bucket = %bucket.name,
                key = %key,
                "object stored but metadata write failed; object is orphaned"
            );
            AppError::from(err)
        })?;

        info!(
            bucket = %bucket.name,
            key = %key,
            user_id = identity.id,
            replaced = !created,
            "file uploaded"
        );

        Ok(UploadOutcome {
            url: self.public_url(&bucket.name, &key),
            file: record,
            bucket_name: bucket.name,
            created,
        })
    }

    async fn update_row(&self, id: i64, row: &NewFile<'_>) -> Result<FileRecord, sqlx::Error> {
        self.metadata
            .update_file(id, row.original_name, row.mime_type, row.size_bytes, row.user_id)
            .await
    }

    /// Write `data` under the first free suffix of `desired`.
    ///
    /// Probing alone is racy, so the write itself is create-only; if another
    /// writer claimed the key in between, probing resumes past it.
    async fn put_with_fresh_key(
        &self,
        bucket: &Bucket,
        desired: &str,
        data: Bytes,
        mime_type: &str,
    ) -> AppResult<String> {
        let mut start = 0;
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let (key, n) =
                resolve_unique_key(self.objects.as_ref(), &self.metadata, bucket, desired, start)
                    .await?;
            match self
                .objects
                .put(&bucket.name, &key, data.clone(), mime_type, PutMode::Create)
                .await
            {
                Ok(_) => return Ok(key),
                Err(ObjectError::AlreadyExists { .. }) => {
                    debug!(attempt, key = %key, "key claimed concurrently, probing further");
                    start = n + 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::storage_fault(format!(
            "could not claim a key for `{desired}` after {MAX_CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Remove a file's object and then its row. Only the uploader or an
    /// admin may delete.
    pub async fn delete(&self, identity: &Identity, locator: &FileLocator) -> AppResult<()> {
        let (bucket_name, key) = require_locator(locator)?;
        let entry = self.find_entry(bucket_name, key).await?;

        if !self.policy().can_delete(identity, &entry.file) {
            return Err(
                AppError::forbidden("User is not allowed to delete this file.")
                    .with_code("DELETE_FORBIDDEN"),
            );
        }

        match self.objects.remove(&entry.bucket_name, &entry.file.unique_name).await {
            Ok(()) => debug!(bucket = %entry.bucket_name, key = %key, "object removed"),
            Err(ObjectError::NotFound { .. }) => warn!(
                bucket = %entry.bucket_name,
                key = %key,
                "object already absent from storage; removing metadata row anyway"
            ),
            Err(err) => return Err(err.into()),
        }

        self.metadata.delete_file(entry.file.id).await?;
        info!(bucket = %entry.bucket_name, key = %key, user_id = identity.id, "file deleted");
        Ok(())
    }

    /// Look the file up and check read access (admin, owner, or member).
    pub async fn find_and_authorize(
        &self,
        identity: &Identity,
        locator: &FileLocator,
    ) -> AppResult<FileEntry> {
        let (bucket_name, key) = require_locator(locator)?;
        let entry = self.find_entry(bucket_name, key).await?;

        if !self.policy().can_access(identity, &entry.file).await? {
            return Err(
                AppError::forbidden("User is not allowed to access this file.")
                    .with_code("ACCESS_FORBIDDEN"),
            );
        }
        Ok(entry)
    }

    /// Metadata for a file; never touches the object store.
    pub async fn info(&self, identity: &Identity, locator: &FileLocator) -> AppResult<FileInfo> {
        let entry = self.find_and_authorize(identity, locator).await?;
        let url = self.public_url(&entry.bucket_name, &entry.file.unique_name);
        Ok(FileInfo { entry, url })
    }

    /// Authorize, stat and open a file for streaming.
    ///
    /// The returned stream logs read failures; once headers have been sent
    /// such a failure aborts the response body.
    pub async fn download(&self, identity: &Identity, locator: &FileLocator) -> AppResult<Download> {
        let entry = self.find_and_authorize(identity, locator).await?;
        let bucket = entry.bucket_name.clone();
        let key = entry.file.unique_name.clone();

        let stat = self.objects.stat(&bucket, &key).await?;
        let stream = self.objects.get(&bucket, &key).await?;

        let stream = stream
            .inspect_err(move |err| {
                error!(bucket = %bucket, key = %key, "object stream failed mid-download: {}", err);
            })
            .boxed();

        Ok(Download {
            file_name: sanitize_filename(&entry.file.original_name)
                .unwrap_or_else(|| "download".into()),
            mime_type: entry.file.mime_type,
            size: stat.size,
            stream,
        })
    }

    async fn find_entry(&self, bucket_name: &str, key: &str) -> AppResult<FileEntry> {
        self.metadata
            .find_file_entry(bucket_name, key)
            .await?
            .ok_or_else(|| {
                AppError::not_found("File not found in the database for this bucket and path.")
                    .with_code("FILE_NOT_FOUND")
            })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn require_locator(locator: &FileLocator) -> AppResult<(&str, &str)> {
    match (locator.bucket_name.as_deref(), locator.path.as_deref()) {
        (Some(bucket), Some(path)) if !bucket.is_empty() && !path.is_empty() => Ok((bucket, path)),
        _ => Err(
            AppError::invalid_request("Parameters \"bucketName\" and \"path\" are required.")
                .with_code("LOCATOR_MISSING"),
        ),
    }
}
