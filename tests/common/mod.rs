//! Shared fixtures: an in-memory metadata store, a temp-dir object store
//! and a `docs` bucket with an admin, two members and an outsider.
#![allow(dead_code)]

use bytes::Bytes;
use file_gateway::{
    errors::{AppResult, ErrorKind},
    models::{bucket::Bucket, user::{Identity, User}},
    services::{
        file_service::{FileLocator, FileService, UploadOutcome, UploadRequest, UploadedFile},
        metadata::MetadataStore,
        object_store::{DiskObjectStore, ObjectStore},
    },
};
use futures::TryStreamExt;
use std::sync::Arc;
use tempfile::TempDir;

pub const BUCKET: &str = "docs";
pub const PUBLIC_BASE: &str = "https://files.example.com";

pub struct Fixture {
    pub service: FileService,
    pub disk: DiskObjectStore,
    pub bucket: Bucket,
    pub admin: User,
    pub member: User,
    pub other_member: User,
    pub outsider: User,
    _tmp: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let disk = DiskObjectStore::new(tmp.path());
        disk.create_bucket(BUCKET).await.unwrap();

        let metadata = MetadataStore::in_memory().await.unwrap();
        let bucket = metadata.create_bucket(BUCKET).await.unwrap();
        let admin = metadata.create_user("root", true).await.unwrap();
        let member = metadata.create_user("maria", false).await.unwrap();
        let other_member = metadata.create_user("nina", false).await.unwrap();
        let outsider = metadata.create_user("otto", false).await.unwrap();
        metadata.add_member(member.id, bucket.id).await.unwrap();
        metadata.add_member(other_member.id, bucket.id).await.unwrap();

        let service = FileService::new(metadata, Arc::new(disk.clone()), PUBLIC_BASE);

        Self {
            service,
            disk,
            bucket,
            admin,
            member,
            other_member,
            outsider,
            _tmp: tmp,
        }
    }

    pub async fn upload(
        &self,
        user: &User,
        name: &str,
        data: &'static [u8],
        replace: bool,
    ) -> AppResult<UploadOutcome> {
        self.service
            .upload(&identity(user), upload_request(BUCKET, None, name, data, replace))
            .await
    }

    pub async fn file_count(&self) -> i64 {
        self.service.metadata.count_files(self.bucket.id).await.unwrap()
    }

    pub async fn object_bytes(&self, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = self
            .disk
            .get(BUCKET, key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }
}

pub fn identity(user: &User) -> Identity {
    user.clone().into()
}

pub fn upload_request(
    bucket: &str,
    path: Option<&str>,
    name: &str,
    data: &'static [u8],
    replace: bool,
) -> UploadRequest {
    UploadRequest {
        bucket_name: Some(bucket.to_string()),
        path: path.map(str::to_string),
        file: Some(UploadedFile {
            original_name: Some(name.to_string()),
            content_type: Some("application/pdf".to_string()),
            data: Bytes::from_static(data),
        }),
        replace,
    }
}

pub fn locator(key: &str) -> FileLocator {
    FileLocator {
        bucket_name: Some(BUCKET.to_string()),
        path: Some(key.to_string()),
    }
}

pub fn err_kind<T>(result: AppResult<T>) -> ErrorKind {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(err) => err.kind,
    }
}
