//! Domain layer types and invariants.

pub mod components;
pub mod error;
pub mod page;
