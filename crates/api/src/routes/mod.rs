//! HTTP route handlers.

pub mod cache;
pub mod charts;
pub mod downloads;
pub mod exports;
pub mod filters;
pub mod health;
