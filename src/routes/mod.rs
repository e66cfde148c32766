//! HTTP route handlers grouped by resource.
//!
//! Each submodule exposes typed Rocket handlers annotated with `#[openapi]`
//! so `rocket_okapi` can derive an OpenAPI document automatically.

pub mod health;
pub(crate) mod helpers;
pub mod models;
pub mod operations;
pub mod records;
pub mod structure;
