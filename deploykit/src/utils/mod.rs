//! Utility functions for deploykit.
//!
//! This module provides:
//! - Resource name slugging and derivation
//! - Run timestamp formatting

mod naming;
mod timestamps;

pub use naming::{is_dns_label, slugify, ResourceNames};
pub use timestamps::{compact_timestamp, time_of_day_suffix, write_atomic};
