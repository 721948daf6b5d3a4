//! Core domain types
//!
//! These types are shared between the stage workers (which mutate payloads
//! and records) and the status API (which reads them).

pub mod deployment;
pub mod key_value;
pub mod payload;
pub mod topology;
