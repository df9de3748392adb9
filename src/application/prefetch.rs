//! Background warming of the page cache.
//!
//! One run enumerates every page of the configured tenant and locale, then
//! loads them in small sequential batches so the backend never sees more
//! than `batch_size` page loads at once. Pages already cached are skipped,
//! which makes a second run cheap.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitrine_api_types::PageListItem;

use crate::application::assembly::video_section_ids;
use crate::application::error::{PageLoadError, SourceError};
use crate::application::page::PageService;
use crate::application::ports::ContentSource;
use crate::cache::{PageCache, ProgressTracker};
use crate::domain::page::PageIdentifier;

const TARGET: &str = "vitrine::prefetch";

const METRIC_PAGE_FAILED: &str = "vitrine_prefetch_page_failed_total";
const METRIC_RUN_MS: &str = "vitrine_prefetch_run_ms";

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub enabled: bool,
    pub batch_size: NonZeroUsize,
    /// Pause inserted before every batch but the first.
    pub batch_delay: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl From<&crate::config::Settings> for PrefetchConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            enabled: settings.prefetch.enabled,
            batch_size: settings.prefetch.batch_size,
            batch_delay: settings.prefetch.batch_delay,
        }
    }
}

#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("failed to enumerate pages: {0}")]
    Enumeration(#[from] SourceError),
    #[error("page list entry {index} has an empty `{field}`")]
    MalformedList { index: usize, field: &'static str },
    #[error("failed to warm page `{page}`: {source}")]
    Page {
        page: PageIdentifier,
        #[source]
        source: PageLoadError,
    },
}

/// Summary of one prefetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    pub total: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Sections handed to the media preload call.
    pub media_sections: Vec<String>,
}

pub struct PrefetchOrchestrator {
    tenant: String,
    locale: String,
    source: Arc<dyn ContentSource>,
    pages: Arc<PageCache>,
    service: PageService,
    progress: Arc<ProgressTracker>,
    config: PrefetchConfig,
}

impl PrefetchOrchestrator {
    pub fn new(
        tenant: impl Into<String>,
        locale: impl Into<String>,
        source: Arc<dyn ContentSource>,
        pages: Arc<PageCache>,
        service: PageService,
        progress: Arc<ProgressTracker>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            locale: locale.into(),
            source,
            pages,
            service,
            progress,
            config,
        }
    }

    /// Warm every page of the site. Individual failures are logged and
    /// counted; they never abort the run.
    pub async fn run(&self, cancel: &CancellationToken) -> PrefetchReport {
        let started = Instant::now();
        info!(target: TARGET, tenant = %self.tenant, locale = %self.locale, "prefetch started");

        let identifiers = match self.page_identifiers().await {
            Ok(identifiers) => identifiers,
            Err(err) => {
                warn!(target: TARGET, error = %err, "page enumeration failed; nothing to prefetch");
                Arc::new(Vec::new())
            }
        };

        let mut report = PrefetchReport {
            total: identifiers.len(),
            ..PrefetchReport::default()
        };
        self.progress.reset(identifiers.len());

        for (index, batch) in identifiers.chunks(self.config.batch_size.get()).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                info!(target: TARGET, batch = index, "prefetch cancelled");
                report.cancelled = true;
                break;
            }
            self.run_batch(index, batch, &mut report).await;
        }

        if !report.cancelled {
            report.media_sections = self.preload_media();
        }

        let elapsed = started.elapsed();
        histogram!(METRIC_RUN_MS).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            target: TARGET,
            total = report.total,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "prefetch finished"
        );
        report
    }

    /// Pages to warm, from the cached index when one exists.
    async fn page_identifiers(&self) -> Result<Arc<Vec<PageIdentifier>>, PrefetchError> {
        if let Some(index) = self.pages.page_index(&self.locale) {
            debug!(target: TARGET, pages = index.len(), "reusing cached page index");
            return Ok(index);
        }

        let items = self.source.list_pages(&self.tenant, &self.locale).await?;
        let identifiers = validate_page_list(&items)?;
        Ok(self.pages.set_page_index(&self.locale, identifiers))
    }

    async fn run_batch(
        &self,
        index: usize,
        batch: &[PageIdentifier],
        report: &mut PrefetchReport,
    ) {
        let (cached, pending): (Vec<&PageIdentifier>, Vec<&PageIdentifier>) = batch
            .iter()
            .partition(|page| self.pages.has(&page.locale, &page.slug));

        report.skipped += cached.len();
        self.progress.advance(cached.len());
        debug!(
            target: TARGET,
            batch = index,
            pending = pending.len(),
            skipped = cached.len(),
            "prefetching batch"
        );

        // `load` joins a mount that is already fetching the same page.
        let results = join_all(pending.into_iter().map(|page| async move {
            let result = self.service.load(&page.locale, &page.slug).await;
            self.progress.advance(1);
            result.map_err(|source| PrefetchError::Page {
                page: page.clone(),
                source,
            })
        }))
        .await;

        for result in results {
            match result {
                Ok(_) => report.fetched += 1,
                Err(err) => {
                    report.failed += 1;
                    counter!(METRIC_PAGE_FAILED).increment(1);
                    warn!(target: TARGET, error = %err, "page prefetch failed");
                }
            }
        }
    }

    /// Fire the media preload for every cached section holding video.
    fn preload_media(&self) -> Vec<String> {
        let section_ids = video_section_ids(&self.pages.pages());
        if section_ids.is_empty() {
            return section_ids;
        }

        debug!(target: TARGET, sections = section_ids.len(), "preloading media");
        let source = Arc::clone(&self.source);
        let ids = section_ids.clone();
        tokio::spawn(async move {
            if let Err(err) = source.preload_media(&ids).await {
                warn!(target: TARGET, error = %err, "media preload failed");
            }
        });
        section_ids
    }
}

/// Convert a page listing into identifiers.
///
/// Any entry missing its id, slug or locale rejects the whole list; duplicate
/// entries are dropped keeping the first occurrence.
pub fn validate_page_list(items: &[PageListItem]) -> Result<Vec<PageIdentifier>, PrefetchError> {
    let mut seen = HashSet::new();
    let mut identifiers = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let field = if item.id.trim().is_empty() {
            Some("id")
        } else if item.slug.trim().is_empty() {
            Some("slug")
        } else if item.locale.trim().is_empty() {
            Some("locale")
        } else {
            None
        };
        if let Some(field) = field {
            return Err(PrefetchError::MalformedList { index, field });
        }

        let identifier = PageIdentifier::new(&item.locale, &item.slug);
        if seen.insert(identifier.clone()) {
            identifiers.push(identifier);
        }
    }
    Ok(identifiers)
}
