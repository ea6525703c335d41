//! HTTP handlers for the file operations.
//! Request parsing and response shaping live here; every decision is
//! delegated to `FileService`.

use crate::{
    errors::{AppError, AppResult},
    handlers::auth::AuthUser,
    services::file_service::{FileLocator, FileService, UploadRequest, UploadedFile},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Query, State,
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub file_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub bucket: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfoResponse {
    pub file_id: i64,
    pub path: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub bucket: String,
    pub uploaded_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub uploader: Option<String>,
    pub url: String,
}

/// `POST /file/upload`: multipart form with `file`, `bucketName`, and
/// optional `path` and `replace`.
///
/// Answers 201 when a new file row was created and 200 when an existing one
/// was replaced.
pub async fn upload_file(
    State(service): State<FileService>,
    AuthUser(identity): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        AppError::invalid_request(format!("File upload error: {}", rejection.body_text()))
            .with_code("MALFORMED_MULTIPART")
    })?;
    let request = read_upload_form(&mut multipart).await?;

    let outcome = service.upload(&identity, request).await?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, "Upload completed successfully!")
    } else {
        (StatusCode::OK, "File replaced successfully!")
    };
    let body = UploadResponse {
        message,
        file_id: outcome.file.id,
        file_name: outcome.file.unique_name,
        original_name: outcome.file.original_name,
        mime_type: outcome.file.mime_type,
        size: outcome.file.size_bytes,
        bucket: outcome.bucket_name,
        url: outcome.url,
    };
    Ok((status, Json(body)).into_response())
}

/// `DELETE /file`: JSON body `{bucketName, path}`; 204 on success.
pub async fn delete_file(
    State(service): State<FileService>,
    AuthUser(identity): AuthUser,
    body: Result<Json<FileLocator>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let locator = json_locator(body)?;
    service.delete(&identity, &locator).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /file/info`: JSON body `{bucketName, path}`.
pub async fn file_info(
    State(service): State<FileService>,
    AuthUser(identity): AuthUser,
    body: Result<Json<FileLocator>, JsonRejection>,
) -> Result<Json<FileInfoResponse>, AppError> {
    let locator = json_locator(body)?;
    let info = service.info(&identity, &locator).await?;
    let file = info.entry.file;

    Ok(Json(FileInfoResponse {
        file_id: file.id,
        path: file.unique_name,
        original_name: file.original_name,
        mime_type: file.mime_type,
        size: file.size_bytes,
        bucket: info.entry.bucket_name,
        uploaded_at: file.created_at,
        last_modified: file.updated_at,
        uploader: info.entry.uploader_name,
        url: info.url,
    }))
}

/// `GET /file/download?bucketName=..&path=..`: streams the object.
///
/// The body is streamed straight from the object store; dropping the
/// response (client gone) stops further reads.
pub async fn download_file(
    State(service): State<FileService>,
    AuthUser(identity): AuthUser,
    query: Result<Query<FileLocator>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(locator) = query.map_err(|rejection| {
        AppError::invalid_request(format!("Invalid query: {}", rejection.body_text()))
    })?;
    let download = service.download(&identity, &locator).await?;

    let mut response = Response::new(Body::from_stream(download.stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

fn json_locator(body: Result<Json<FileLocator>, JsonRejection>) -> AppResult<FileLocator> {
    body.map(|Json(locator)| locator).map_err(|rejection| {
        AppError::invalid_request(format!("Invalid JSON body: {}", rejection.body_text()))
            .with_code("MALFORMED_BODY")
    })
}

/// Drain the multipart form into an [`UploadRequest`].
///
/// Unknown fields are skipped. A second `file` part is rejected, as is any
/// framing error, which names the field it happened in.
async fn read_upload_form(multipart: &mut Multipart) -> AppResult<UploadRequest> {
    let mut request = UploadRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, None))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if request.file.is_some() {
                    return Err(AppError::invalid_request(
                        "File upload error: more than one file sent (field: file)",
                    )
                    .with_code("LIMIT_UNEXPECTED_FILE"));
                }
                let original_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(err, Some(&name)))?;
                request.file = Some(UploadedFile {
                    original_name,
                    content_type,
                    data,
                });
            }
            "bucketName" => request.bucket_name = Some(read_text(field, &name).await?),
            "path" => request.path = Some(read_text(field, &name).await?),
            "replace" => {
                request.replace = read_text(field, &name)
                    .await?
                    .trim()
                    .eq_ignore_ascii_case("true");
            }
            other => debug!("ignoring multipart field `{}`", other),
        }
    }

    Ok(request)
}

async fn read_text(field: Field<'_>, name: &str) -> AppResult<String> {
    field.text().await.map_err(|err| multipart_error(err, Some(name)))
}

fn multipart_error(err: MultipartError, field: Option<&str>) -> AppError {
    let code = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "LIMIT_FILE_SIZE"
    } else {
        "MALFORMED_MULTIPART"
    };
    AppError::invalid_request(format!(
        "File upload error: {} (field: {})",
        err.body_text(),
        field.unwrap_or("unknown")
    ))
    .with_code(code)
}
