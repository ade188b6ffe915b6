//! Database module for uptrail.
//!
//! Provides the SQLite time-series store for probe results.

mod models;
mod store;

pub use models::*;
pub use store::*;
