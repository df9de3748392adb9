//! In-memory `ContentSource` used by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, json};
use tokio::sync::Notify;
use vitrine::application::error::{QueryError, SourceError};
use vitrine::application::ports::ContentSource;
use vitrine::application::prefetch::PrefetchConfig;
use vitrine::application::runtime::{ContentRuntime, RuntimeConfig};
use vitrine::application::scroll::ScrollConfig;
use vitrine::cache::CacheConfig;
use vitrine_api_types::{
    ComponentPayload, MenuPayload, PageListItem, PageMetadataPayload, PagePayload,
    SectionComponentsPayload, SectionMetadataPayload, SectionPayload,
};

pub const TENANT: &str = "acme";
pub const LOCALE: &str = "en";

#[derive(Default)]
pub struct FakeSource {
    pub slugs: Vec<String>,
    pub failing: HashSet<String>,
    pub video_pages: HashSet<String>,
    pub landing_pages: HashSet<String>,
    pub list_fails: bool,
    pub malformed_list: bool,
    pub preload_fails: bool,
    pub load_delay: Duration,

    pub list_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
    pub loaded: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub preloaded: Mutex<Vec<Vec<String>>>,
    pub preload_done: Notify,
}

impl FakeSource {
    pub fn with_pages(slugs: &[&str]) -> Self {
        Self {
            slugs: slugs.iter().map(|slug| slug.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing(mut self, slug: &str) -> Self {
        self.failing.insert(slug.to_string());
        self
    }

    pub fn with_video(mut self, slug: &str) -> Self {
        self.video_pages.insert(slug.to_string());
        self
    }

    pub fn landing(mut self, slug: &str) -> Self {
        self.landing_pages.insert(slug.to_string());
        self
    }

    pub fn loads(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn page(&self, slug: &str) -> PagePayload {
        let mut metadata = vec![SectionMetadataPayload {
            id: format!("{slug}-hero"),
            title: Some("Hero".to_string()),
            order: 1,
            background_image: None,
            background_type: None,
        }];
        let mut sections = vec![SectionPayload {
            components: vec![component(&format!("{slug}-hero-c"), "hero")],
        }];
        if self.video_pages.contains(slug) {
            metadata.push(SectionMetadataPayload {
                id: format!("{slug}-video"),
                title: None,
                order: 0,
                background_image: None,
                background_type: Some("video".to_string()),
            });
            sections.push(SectionPayload {
                components: vec![component(&format!("{slug}-video-c"), "video")],
            });
        }

        let page_type = if self.landing_pages.contains(slug) {
            "landing"
        } else {
            "standard"
        };
        PagePayload {
            page: PageMetadataPayload {
                id: format!("id-{slug}"),
                slug: slug.to_string(),
                locale: LOCALE.to_string(),
                title: Some(slug.to_string()),
                page_type: Some(page_type.to_string()),
                sections: metadata,
            },
            sections,
        }
    }
}

fn component(id: &str, kind: &str) -> ComponentPayload {
    let mut data = Map::new();
    data.insert("label".to_string(), json!(id));
    ComponentPayload {
        id: id.to_string(),
        component_type: kind.to_string(),
        data,
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn list_pages(&self, tenant: &str, locale: &str) -> Result<Vec<PageListItem>, SourceError> {
        assert_eq!(tenant, TENANT);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails {
            return Err(QueryError::transport("connection refused").into());
        }
        let mut items: Vec<PageListItem> = self
            .slugs
            .iter()
            .map(|slug| PageListItem {
                id: format!("id-{slug}"),
                slug: slug.clone(),
                locale: locale.to_string(),
            })
            .collect();
        if self.malformed_list
            && let Some(item) = items.last_mut()
        {
            item.slug.clear();
        }
        Ok(items)
    }

    async fn load_page(&self, _locale: &str, slug: &str) -> Result<PagePayload, SourceError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.loaded.lock().expect("loaded lock").push(slug.to_string());

        if self.failing.contains(slug) {
            return Err(QueryError::transport("gateway timeout").into());
        }
        if !self.slugs.iter().any(|known| known == slug) {
            return Err(SourceError::NotFound {
                slug: slug.to_string(),
            });
        }
        Ok(self.page(slug))
    }

    async fn fetch_section_components(
        &self,
        section_id: &str,
    ) -> Result<SectionComponentsPayload, SourceError> {
        Ok(SectionComponentsPayload {
            components: vec![component(&format!("{section_id}-fresh"), "text")],
            last_updated: None,
        })
    }

    async fn fetch_menus(&self) -> Result<Vec<MenuPayload>, SourceError> {
        Ok(Vec::new())
    }

    async fn preload_media(&self, section_ids: &[String]) -> Result<(), SourceError> {
        self.preloaded
            .lock()
            .expect("preloaded lock")
            .push(section_ids.to_vec());
        self.preload_done.notify_one();
        if self.preload_fails {
            return Err(QueryError::transport("media service down").into());
        }
        Ok(())
    }
}

pub fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        tenant: TENANT.to_string(),
        locale: LOCALE.to_string(),
        cache: CacheConfig::default(),
        prefetch: PrefetchConfig::default(),
        scroll: ScrollConfig::default(),
    }
}

pub fn runtime(source: &Arc<FakeSource>) -> ContentRuntime {
    runtime_with(source, runtime_config())
}

pub fn runtime_with(source: &Arc<FakeSource>, config: RuntimeConfig) -> ContentRuntime {
    ContentRuntime::new(config, Arc::clone(source) as Arc<dyn ContentSource>)
}
