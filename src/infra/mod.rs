//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod graphql;
pub mod telemetry;
