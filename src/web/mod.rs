//! HTTP control surface: the axum router and its JSON request/response types.

pub mod api;
pub mod models;

pub use api::create_router;
