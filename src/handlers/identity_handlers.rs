//! `GET /me`: who am I, according to my token.

use axum::Json;

use crate::{handlers::auth::AuthUser, models::user::Identity};

pub async fn me(AuthUser(identity): AuthUser) -> Json<Identity> {
    Json(identity)
}
