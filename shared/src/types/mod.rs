//! Data model types

pub mod costs;
pub mod events;
pub mod filter;
pub mod summary;
pub mod symbols;
