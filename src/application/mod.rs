//! Page loading, prefetching and scroll navigation on top of the caches.

pub mod assembly;
pub mod error;
pub mod page;
pub mod ports;
pub mod prefetch;
pub mod runtime;
pub mod scroll;
