//! Users and the caller identity derived from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A user row, including the long-lived API token.
///
/// Never serialize this type into a response; use [`Identity`] instead.
#[derive(Clone, FromRow, Debug)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub api_token: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authenticated caller. Carries no credential material.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub is_admin: bool,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            is_admin: user.is_admin,
        }
    }
}
