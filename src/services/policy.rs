//! Access-control decisions for buckets and files.
//!
//! Admins may do anything. Otherwise uploads need bucket membership, reads
//! need ownership or membership, and deletes need ownership. Membership is a
//! metadata-store round-trip, so the checks are async and fallible.

use crate::{
    errors::AppResult,
    models::{bucket::Bucket, file::FileRecord, user::Identity},
    services::metadata::MetadataStore,
};

#[derive(Clone, Copy, Debug)]
pub struct AccessPolicy<'a> {
    metadata: &'a MetadataStore,
}

impl<'a> AccessPolicy<'a> {
    pub fn new(metadata: &'a MetadataStore) -> Self {
        Self { metadata }
    }

    /// May `identity` upload into `bucket`?
    pub async fn can_write(&self, identity: &Identity, bucket: &Bucket) -> AppResult<bool> {
        if identity.is_admin {
            return Ok(true);
        }
        Ok(self.metadata.is_member(identity.id, bucket.id).await?)
    }

    /// May `identity` read `file` (info or download)?
    pub async fn can_access(&self, identity: &Identity, file: &FileRecord) -> AppResult<bool> {
        if identity.is_admin || file.user_id == identity.id {
            return Ok(true);
        }
        Ok(self.metadata.is_member(identity.id, file.bucket_id).await?)
    }

    /// May `identity` delete `file`? Membership alone is not enough.
    pub fn can_delete(&self, identity: &Identity, file: &FileRecord) -> bool {
        identity.is_admin || file.user_id == identity.id
    }
}
