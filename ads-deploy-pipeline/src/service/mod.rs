//! Service Module
//!
//! Business logic sitting between the stages/API and the repositories.

pub mod deployment;
pub mod health;
pub mod key_value;
pub mod status_feed;

// Re-export for convenience
pub use deployment as deployment_service;
pub use health::HealthRegistry;
pub use key_value as key_value_service;
pub use status_feed::StatusFeed;
