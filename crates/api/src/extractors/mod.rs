//! Custom Axum extractors.

pub mod user_context;

pub use user_context::{UserContext, USER_ID_HEADER};
