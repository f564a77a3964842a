#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! orgbill API Library
//!
//! This crate contains the HTTP server that exposes the billing engine: checkout and gated
//! organization creation, seat sync, billing portal and billing summary.

pub mod config;
pub mod error;
pub mod organizations;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
