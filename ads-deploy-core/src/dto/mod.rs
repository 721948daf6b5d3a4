//! Data Transfer Objects
//!
//! Lightweight shapes for the status channel and the HTTP API.

pub mod deployment;
pub mod status;
