//! HTTP surface: thin axum handlers over the routing core.

pub mod client;
pub mod correlation;
