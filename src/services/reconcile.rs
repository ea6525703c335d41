//! Read-only drift report between the metadata store and the object store.
//!
//! Uploads and deletes mutate the two stores in separate round-trips, so
//! they can diverge. This module lists the divergence; it never repairs it.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::{errors::AppResult, services::file_service::FileService};

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketDrift {
    pub bucket: String,
    /// False when the bucket row has no counterpart in the object store.
    pub in_object_store: bool,
    /// Keys with a metadata row but no object.
    pub missing_objects: Vec<String>,
    /// Keys with an object but no metadata row.
    pub orphan_objects: Vec<String>,
}

impl BucketDrift {
    pub fn is_clean(&self) -> bool {
        self.in_object_store && self.missing_objects.is_empty() && self.orphan_objects.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct DriftReport {
    pub buckets: Vec<BucketDrift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.buckets.iter().all(BucketDrift::is_clean)
    }
}

/// Compare every metadata bucket with its object-store counterpart.
pub async fn audit(service: &FileService) -> AppResult<DriftReport> {
    let mut buckets = Vec::new();

    for bucket in service.metadata.list_buckets().await? {
        let rows: BTreeSet<String> = service
            .metadata
            .list_file_keys(bucket.id)
            .await?
            .into_iter()
            .collect();

        let in_object_store = service.objects.bucket_exists(&bucket.name).await?;
        let objects: BTreeSet<String> = if in_object_store {
            service.objects.list_keys(&bucket.name).await?.into_iter().collect()
        } else {
            BTreeSet::new()
        };

        let drift = BucketDrift {
            in_object_store,
            missing_objects: rows.difference(&objects).cloned().collect(),
            orphan_objects: objects.difference(&rows).cloned().collect(),
            bucket: bucket.name,
        };
        if !drift.is_clean() {
            tracing::warn!(
                bucket = %drift.bucket,
                missing = drift.missing_objects.len(),
                orphans = drift.orphan_objects.len(),
                "metadata and object store disagree"
            );
        }
        buckets.push(drift);
    }

    Ok(DriftReport { buckets })
}
