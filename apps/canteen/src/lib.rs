//! # canteen
//!
//! Library half of the `canteen` CLI: configuration, query expressions and
//! store setup, kept here so they can be tested without the binary.

pub mod config;
pub mod expr;
pub mod store;

pub use config::{BackendKind, CanteenConfig};
pub use store::Store;
