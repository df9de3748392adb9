//! Collaborator traits at the edge of the content runtime.

use async_trait::async_trait;
use serde_json::Value;
use vitrine_api_types::{
    GraphqlRequest, MenuPayload, PageListItem, PagePayload, SectionComponentsPayload,
};

use super::error::{QueryError, SourceError};

/// Sends GraphQL operations to the backend.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    /// Execute one operation and return its `data` object.
    async fn execute(&self, request: GraphqlRequest) -> Result<Value, QueryError>;

    /// Execute several operations in one round trip.
    ///
    /// The outer error fails the whole batch; otherwise result `i` belongs
    /// to request `i`.
    async fn execute_batch(
        &self,
        requests: Vec<GraphqlRequest>,
    ) -> Result<Vec<Result<Value, QueryError>>, QueryError>;

    /// Whether the backend accepts batched (array) requests.
    fn supports_batching(&self) -> bool;
}

/// Content operations the page runtime depends on.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Enumerate every page of `tenant` in `locale`.
    async fn list_pages(&self, tenant: &str, locale: &str)
    -> Result<Vec<PageListItem>, SourceError>;

    /// Load one page with its sections' components.
    async fn load_page(&self, locale: &str, slug: &str) -> Result<PagePayload, SourceError>;

    async fn fetch_section_components(
        &self,
        section_id: &str,
    ) -> Result<SectionComponentsPayload, SourceError>;

    async fn fetch_menus(&self) -> Result<Vec<MenuPayload>, SourceError>;

    /// Ask the backend to warm media for the given sections. Best effort.
    async fn preload_media(&self, section_ids: &[String]) -> Result<(), SourceError>;
}
