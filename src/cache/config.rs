//! Cache configuration.
//!
//! Controls query cache lifetimes and the batching window; derived from the
//! `[cache]` and `[batcher]` sections of `vitrine.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_SECTION_TTL_SECS: u64 = 300;
const DEFAULT_MENU_TTL_SECS: u64 = 600;
const DEFAULT_BATCH_WINDOW_MS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached section content.
    pub section_ttl_secs: u64,
    /// Lifetime of the cached menu list used to patch headers.
    pub menu_ttl_secs: u64,
    /// How long the batcher waits for siblings before flushing.
    pub batch_window_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            section_ttl_secs: DEFAULT_SECTION_TTL_SECS,
            menu_ttl_secs: DEFAULT_MENU_TTL_SECS,
            batch_window_ms: DEFAULT_BATCH_WINDOW_MS,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            section_ttl_secs: settings.cache.section_ttl.as_secs(),
            menu_ttl_secs: settings.cache.menu_ttl.as_secs(),
            batch_window_ms: u64::try_from(settings.batcher.window.as_millis())
                .unwrap_or(DEFAULT_BATCH_WINDOW_MS),
        }
    }
}

impl CacheConfig {
    pub fn section_ttl(&self) -> Duration {
        Duration::from_secs(self.section_ttl_secs)
    }

    pub fn menu_ttl(&self) -> Duration {
        Duration::from_secs(self.menu_ttl_secs)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}
