//! Shared types and wire protocol for perfstream
//!
//! This crate contains the data model produced while decoding a perfparser
//! stream (symbols, locations, cost tables, per-thread event logs) together
//! with the incremental decoder for the stream itself.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{costs::*, events::*, filter::*, summary::*, symbols::*};
