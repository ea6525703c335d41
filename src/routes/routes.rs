//! Defines routes for the file gateway.
//!
//! ## Structure
//! - **File endpoints** (bearer token required)
//!   - `POST   /file/upload`  : multipart upload (`file`, `bucketName`, `path`, `replace`)
//!   - `DELETE /file`         : delete by `{bucketName, path}`
//!   - `POST   /file/info`    : metadata by `{bucketName, path}`
//!   - `GET    /file/download`: stream by `?bucketName=&path=`
//! - **Identity**
//!   - `GET    /me`           : the caller behind the token
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, file_info, upload_file},
        health_handlers::{healthz, readyz},
        identity_handlers::me,
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router for all gateway routes.
///
/// `max_upload_bytes` caps request bodies; larger uploads fail as a bad
/// request naming the limit.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/me", get(me))
        .route("/file/upload", post(upload_file))
        .route("/file", delete(delete_file))
        .route("/file/info", post(file_info))
        .route("/file/download", get(download_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}
