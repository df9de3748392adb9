//! Vitrine cache system.
//!
//! Two process-wide layers back the page renderer:
//!
//! - **Query cache**: results of individual backend queries (section content,
//!   menus) with TTL, invalidation tags and in-flight deduplication
//! - **Page cache**: fully assembled pages keyed by locale and slug, warmed by
//!   the prefetch orchestrator
//!
//! Queries reach the transport through the [`QueryBatcher`], which coalesces
//! requests issued within a short window.

mod batcher;
mod config;
mod lock;
mod page;
mod progress;
mod query;
mod tags;

pub use batcher::QueryBatcher;
pub use config::CacheConfig;
pub use page::PageCache;
pub use progress::{PrefetchProgress, ProgressTracker};
pub use query::{FetchOptions, QueryCache};
pub use tags::CacheTag;
