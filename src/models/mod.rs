//! Core data models for the file gateway.
//!
//! These entities mirror the metadata tables (users, buckets, files) and map
//! to rows via `sqlx::FromRow`. Response shapes that leave the process are
//! defined next to the handlers, not here.

pub mod bucket;
pub mod file;
pub mod user;
