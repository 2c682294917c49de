//! Domain layer for the revenue dashboard backend.
//!
//! This crate contains:
//! - Domain models (filters, chart payloads, exports, download tokens)
//! - In-process services (filter store, chart data cache, fetch coordinator)
//! - Storage traits with in-memory implementations
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;

pub use error::StoreError;
