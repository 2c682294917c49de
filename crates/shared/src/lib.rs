//! Shared utilities and common types for the revenue dashboard backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (hashing, download token generation)
//! - Field validators for filter input
//! - Cursor pagination helpers

pub mod crypto;
pub mod pagination;
pub mod validation;
