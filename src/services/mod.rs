pub mod file_service;
pub mod identity;
pub mod metadata;
pub mod naming;
pub mod object_store;
pub mod policy;
pub mod reconcile;
