//! src/services/object_store.rs
//!
//! The object-store seam used by the pipelines plus `DiskObjectStore`, a
//! backend that keeps payloads on local disk.
//!
//! Keys are flat strings, as in S3: `report` and `report/x.txt` can coexist.
//! Each payload is stored under the MD5 of `bucket/key`, sharded as
//! `root/{bucket}/objects/{aa}/{bb}/{digest}`, with a JSON sidecar at
//! `root/{bucket}/meta/{aa}/{bb}/{digest}.json` that records the real key,
//! MIME type and ETag. Writes are staged in `root/.staging` and published
//! with a single rename (overwrite) or hard link (create-only), so a reader
//! never observes a half-written object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    AlreadyExists { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectResult<T> = Result<T, ObjectError>;

/// Byte stream handed back by [`ObjectStore::get`].
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Publishing behaviour for [`ObjectStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with `AlreadyExists` if the key is taken.
    Create,
    /// Replace whatever is stored at the key.
    Overwrite,
}

/// What the object store knows about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Blob storage keyed by `(bucket, key)`.
///
/// Every call is an independent round-trip; nothing here coordinates with
/// the metadata store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool>;

    /// Create the bucket if it does not exist yet.
    async fn create_bucket(&self, bucket: &str) -> ObjectResult<()>;

    async fn stat(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStat>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        mode: PutMode,
    ) -> ObjectResult<ObjectStat>;

    async fn get(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStream>;

    /// Remove an object. Absence is reported as `NotFound`; callers decide
    /// whether that matters.
    async fn remove(&self, bucket: &str, key: &str) -> ObjectResult<()>;

    /// All keys in a bucket, sorted.
    async fn list_keys(&self, bucket: &str) -> ObjectResult<Vec<String>>;

    /// Readiness probe: verify the backend accepts writes.
    async fn root_writable(&self) -> ObjectResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> ObjectResult<bool> {
        match self.stat(bucket, key).await {
            Ok(_) => Ok(true),
            Err(ObjectError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const STAGING_DIR: &str = ".staging";

/// Per-object sidecar persisted next to the payload tree.
#[derive(Serialize, Deserialize, Debug)]
struct Sidecar {
    key: String,
    content_type: String,
    etag: String,
}

/// Local-disk implementation of [`ObjectStore`].
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    root: PathBuf,
}

impl DiskObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_root(&self, bucket: &str) -> ObjectResult<PathBuf> {
        ensure_bucket_name_safe(bucket)?;
        Ok(self.root.join(bucket))
    }

    /// Shard directories and payload file name for a key.
    ///
    /// Uses MD5(bucket/key): the first two bytes name the shard directories
    /// and the full hex digest names the file.
    fn object_shards(bucket: &str, key: &str) -> (String, String, String) {
        let digest = md5::compute(format!("{bucket}/{key}"));
        (
            format!("{:02x}", digest[0]),
            format!("{:02x}", digest[1]),
            format!("{digest:x}"),
        )
    }

    fn object_path(&self, bucket: &str, key: &str) -> ObjectResult<PathBuf> {
        ensure_key_safe(key)?;
        let (shard_a, shard_b, name) = Self::object_shards(bucket, key);
        Ok(self
            .bucket_root(bucket)?
            .join(OBJECTS_DIR)
            .join(shard_a)
            .join(shard_b)
            .join(name))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> ObjectResult<PathBuf> {
        ensure_key_safe(key)?;
        let (shard_a, shard_b, name) = Self::object_shards(bucket, key);
        Ok(self
            .bucket_root(bucket)?
            .join(META_DIR)
            .join(shard_a)
            .join(shard_b)
            .join(format!("{name}.json")))
    }

    /// Resolve the bucket directory, failing with `BucketNotFound` if absent.
    async fn require_bucket(&self, bucket: &str) -> ObjectResult<PathBuf> {
        let root = self.bucket_root(bucket)?;
        if is_dir(&root).await? {
            Ok(root)
        } else {
            Err(ObjectError::BucketNotFound(bucket.to_string()))
        }
    }

    /// Write `data` to a fresh, fsynced temp file inside the staging area.
    async fn stage(&self, data: &[u8]) -> ObjectResult<PathBuf> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        let tmp_path = staging.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectError::Io(err));
        }
        Ok(tmp_path)
    }

    async fn read_sidecar(&self, bucket: &str, key: &str) -> Option<Sidecar> {
        read_sidecar_at(&self.sidecar_path(bucket, key).ok()?).await
    }

    async fn write_sidecar(&self, bucket: &str, key: &str, sidecar: &Sidecar) -> ObjectResult<()> {
        let path = self.sidecar_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(sidecar).map_err(io::Error::other)?;
        let tmp_path = self.stage(&raw).await?;
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectError::Io(err));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to (excluding) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool> {
        let root = self.bucket_root(bucket)?;
        Ok(is_dir(&root).await?)
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectResult<()> {
        let root = self.bucket_root(bucket)?;
        fs::create_dir_all(root.join(OBJECTS_DIR)).await?;
        fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStat> {
        let path = self.object_path(bucket, key)?;
        self.require_bucket(bucket).await?;

        let meta = fs::metadata(&path)
            .await
            .map_err(|err| absent_or_io(err, bucket, key))?;
        if !meta.is_file() {
            return Err(not_found(bucket, key));
        }

        let sidecar = self.read_sidecar(bucket, key).await;
        Ok(ObjectStat {
            size: meta.len(),
            content_type: sidecar.as_ref().map(|s| s.content_type.clone()),
            etag: sidecar.map(|s| s.etag),
            last_modified: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        mode: PutMode,
    ) -> ObjectResult<ObjectStat> {
        let path = self.object_path(bucket, key)?;
        self.require_bucket(bucket).await?;

        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = self.stage(&data).await?;
        let published = match mode {
            // A hard link never replaces an existing entry, which makes it a
            // race-free "create if absent".
            PutMode::Create => fs::hard_link(&tmp_path, &path).await.map_err(|err| {
                if err.kind() == ErrorKind::AlreadyExists {
                    ObjectError::AlreadyExists {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    ObjectError::Io(err)
                }
            }),
            PutMode::Overwrite => fs::rename(&tmp_path, &path).await.map_err(ObjectError::Io),
        };
        // After a successful rename the temp file is already gone.
        let _ = fs::remove_file(&tmp_path).await;
        published?;

        let etag = format!("{:x}", md5::compute(&data));
        self.write_sidecar(
            bucket,
            key,
            &Sidecar {
                key: key.to_string(),
                content_type: content_type.to_string(),
                etag: etag.clone(),
            },
        )
        .await?;

        debug!(bucket, key, size = data.len(), "stored object");
        Ok(ObjectStat {
            size: data.len() as u64,
            content_type: Some(content_type.to_string()),
            etag: Some(etag),
            last_modified: Utc::now(),
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> ObjectResult<ObjectStream> {
        let path = self.object_path(bucket, key)?;
        self.require_bucket(bucket).await?;

        let meta = fs::metadata(&path)
            .await
            .map_err(|err| absent_or_io(err, bucket, key))?;
        if !meta.is_file() {
            return Err(not_found(bucket, key));
        }
        let file = File::open(&path)
            .await
            .map_err(|err| absent_or_io(err, bucket, key))?;

        Ok(ReaderStream::new(file).boxed())
    }

    async fn remove(&self, bucket: &str, key: &str) -> ObjectResult<()> {
        let path = self.object_path(bucket, key)?;
        let sidecar = self.sidecar_path(bucket, key)?;
        let bucket_root = self.require_bucket(bucket).await?;

        fs::remove_file(&path)
            .await
            .map_err(|err| absent_or_io(err, bucket, key))?;
        debug!("removed object file {}", path.display());

        if let Err(err) = fs::remove_file(&sidecar).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove sidecar {}: {}", sidecar.display(), err);
            }
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, &bucket_root.join(OBJECTS_DIR))
                .await;
        }
        if let Some(parent) = sidecar.parent() {
            self.prune_empty_dirs(parent, &bucket_root.join(META_DIR))
                .await;
        }
        Ok(())
    }

    /// Payload files name only a digest, so keys are read back from the
    /// sidecars. A payload without a readable sidecar is skipped with a
    /// warning.
    async fn list_keys(&self, bucket: &str) -> ObjectResult<Vec<String>> {
        let bucket_root = self.require_bucket(bucket).await?;
        let objects_root = bucket_root.join(OBJECTS_DIR);
        let meta_root = bucket_root.join(META_DIR);
        if !is_dir(&objects_root).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![objects_root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&objects_root) else {
                    continue;
                };
                let mut sidecar = meta_root.join(relative).into_os_string();
                sidecar.push(".json");
                match read_sidecar_at(Path::new(&sidecar)).await {
                    Some(meta) => keys.push(meta.key),
                    None => warn!(
                        bucket,
                        payload = %path.display(),
                        "payload has no readable sidecar; key unknown"
                    ),
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn root_writable(&self) -> ObjectResult<()> {
        let tmp_path = self.stage(b"readyz").await?;
        let bytes = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if bytes? == b"readyz" {
            Ok(())
        } else {
            Err(ObjectError::Io(io::Error::other("staged file content mismatch")))
        }
    }
}

async fn read_sidecar_at(path: &Path) -> Option<Sidecar> {
    match fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .map_err(|err| debug!("unreadable sidecar {}: {}", path.display(), err))
            .ok(),
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to read sidecar {}: {}", path.display(), err);
            }
            None
        }
    }
}

async fn is_dir(path: &Path) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn not_found(bucket: &str, key: &str) -> ObjectError {
    ObjectError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn absent_or_io(err: io::Error, bucket: &str, key: &str) -> ObjectError {
    if err.kind() == ErrorKind::NotFound {
        not_found(bucket, key)
    } else {
        ObjectError::Io(err)
    }
}

/// Reject malformed object keys.
///
/// Checks are per segment: `a..b.txt` is a legal key, `a/../b` is not.
fn ensure_key_safe(key: &str) -> ObjectResult<()> {
    let invalid = || ObjectError::InvalidKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN || key.starts_with('/') {
        return Err(invalid());
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3 to 63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> ObjectResult<()> {
    let invalid = |reason: &str| ObjectError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
