//! File gateway: upload, download, delete and metadata lookup over an object
//! store, with ownership, bucket membership and file records kept in SQLite.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;

use services::file_service::FileService;

/// The complete HTTP application with state attached.
pub fn app(service: FileService, max_upload_bytes: usize) -> Router {
    routes::routes::routes(max_upload_bytes).with_state(service)
}
