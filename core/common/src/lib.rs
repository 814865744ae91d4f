//! Common utilities and types shared across the ValueStocks crates.
//!
//! This module provides the error taxonomy used by every crate and the
//! path type used to address objects in remote storage.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::RemotePath;
