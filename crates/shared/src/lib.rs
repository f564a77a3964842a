#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! orgbill Shared Types and Utilities
//!
//! This crate contains the ID types, access levels and database helpers shared by the
//! billing engine and the API server.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
