//! Bearer-token authentication as an axum extractor.
//!
//! Handlers that take [`AuthUser`] only run for callers with a valid token;
//! everything else is answered with 401 (no token) or 403 (unknown token)
//! before the request body is read.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{
    errors::AppError,
    models::user::Identity,
    services::{file_service::FileService, identity::resolve_identity},
};

/// The authenticated caller of the current request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<FileService> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &FileService,
    ) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        resolve_identity(&service.metadata, authorization)
            .await
            .map(AuthUser)
    }
}
