//! ADS Deploy Core
//!
//! Core types and abstractions for the ADS deployment pipeline.
//!
//! This crate contains:
//! - Domain types: payload, deployment records, key/value rows, topology
//! - DTOs: status events and API request/response shapes

pub mod domain;
pub mod dto;
