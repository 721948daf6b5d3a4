//! Repository Module
//!
//! Data access layer for the deployment store.
//! Each repository handles database operations for one table.

pub mod deployment;
pub mod key_value;

// Re-export for convenience
pub use deployment as deployment_repository;
pub use key_value as key_value_repository;
