//! Maps a bearer credential to the caller's identity.

use crate::{
    errors::{AppError, AppResult},
    models::user::Identity,
    services::metadata::MetadataStore,
};

/// Extract the token from an `Authorization` header value.
///
/// The token is the second whitespace-separated part (`Bearer <token>`);
/// anything without one counts as no credential at all.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?.split_whitespace().nth(1)
}

/// Resolve the caller behind an `Authorization` header value.
///
/// No token yields `Unauthenticated`; a token matching no user yields
/// `InvalidCredential`. The returned identity never contains the token.
pub async fn resolve_identity(
    metadata: &MetadataStore,
    authorization: Option<&str>,
) -> AppResult<Identity> {
    let Some(token) = bearer_token(authorization) else {
        return Err(AppError::unauthenticated("Authentication token not provided.")
            .with_code("TOKEN_MISSING"));
    };

    match metadata.find_user_by_token(token).await? {
        Some(user) => Ok(user.into()),
        None => Err(AppError::invalid_credential("Invalid or expired token.")
            .with_code("TOKEN_INVALID")),
    }
}
