//! Turning caller-supplied names into storage-legal object keys.
//!
//! `sanitize_filename` and `sanitize_path` are pure. `resolve_unique_key`
//! probes the stores one candidate at a time and is therefore not atomic;
//! the upload pipeline pairs it with a create-only put to close the race.

use uuid::Uuid;

use crate::{
    errors::{AppError, AppResult},
    models::bucket::Bucket,
    services::{metadata::MetadataStore, object_store::ObjectStore},
};

/// Upper bound on suffix probes for a single key.
pub const MAX_SUFFIX: u32 = 10_000;

/// Split a file name into `(stem, extension)`, where the extension includes
/// its leading dot. A leading dot alone does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Last `/`-separated component of a name.
fn last_component(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn filter_extension(ext: &str) -> String {
    ext.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect()
}

/// Sanitize an uploaded file name.
///
/// Whitespace runs in the stem collapse to `_`, then everything outside
/// `[A-Za-z0-9_.-]` is dropped. The extension is reattached with only
/// alphanumerics and dots kept. Returns `None` when the stem is blank, or
/// ends up empty or made only of dots; the caller then falls back to
/// [`generated_name`].
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = last_component(raw);
    let (stem, ext) = split_extension(name);
    if stem.trim().is_empty() {
        return None;
    }

    let mut collapsed = String::with_capacity(stem.len());
    let mut in_whitespace = false;
    for c in stem.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                collapsed.push('_');
            }
            in_whitespace = true;
        } else {
            collapsed.push(c);
            in_whitespace = false;
        }
    }

    let stem: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        return None;
    }

    Some(format!("{stem}{}", filter_extension(ext)))
}

/// Random replacement name that keeps the original (filtered) extension.
pub fn generated_name(raw: &str) -> String {
    let (_, ext) = split_extension(last_component(raw));
    format!("{}{}", Uuid::new_v4(), filter_extension(ext))
}

/// Sanitize a caller-supplied directory prefix.
///
/// Removes `..`, drops characters outside `[A-Za-z0-9/_-]`, and collapses
/// empty segments, so the result never escapes the bucket or contains `//`.
pub fn sanitize_path(raw: &str) -> String {
    raw.replace("..", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
        .collect::<String>()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a sanitized prefix and file name into an object key.
pub fn join_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// The `n`-th candidate for `desired`: `name.ext`, `name_(1).ext`, ...
///
/// The suffix goes before the extension of the last path component; any
/// directory prefix is kept.
pub fn suffixed_key(desired: &str, n: u32) -> String {
    if n == 0 {
        return desired.to_string();
    }
    let (dir, file) = match desired.rfind('/') {
        Some(idx) => desired.split_at(idx + 1),
        None => ("", desired),
    };
    let (stem, ext) = split_extension(file);
    format!("{dir}{stem}_({n}){ext}")
}

/// Find the first free candidate for `desired`, starting at suffix `start`.
///
/// A candidate is taken if the object store holds an object at it or a
/// metadata row in the same bucket already claims it. Returns the key and the
/// suffix number it was found at so a caller can resume after a lost race.
pub async fn resolve_unique_key(
    objects: &dyn ObjectStore,
    metadata: &MetadataStore,
    bucket: &Bucket,
    desired: &str,
    start: u32,
) -> AppResult<(String, u32)> {
    for n in start..=MAX_SUFFIX {
        let candidate = suffixed_key(desired, n);
        if objects.exists(&bucket.name, &candidate).await? {
            continue;
        }
        if metadata
            .find_file_in_bucket(bucket.id, &candidate)
            .await?
            .is_some()
        {
            tracing::warn!(
                bucket = %bucket.name,
                key = %candidate,
                "metadata row exists without object; skipping key"
            );
            continue;
        }
        return Ok((candidate, n));
    }

    Err(AppError::storage_fault(format!(
        "no free key for `{desired}` in bucket `{}` after {MAX_SUFFIX} attempts",
        bucket.name
    )))
}
