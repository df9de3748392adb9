//! GraphQL backend adapters: the HTTP transport and the content source built
//! on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use vitrine_api_types::{
    GraphqlRequest, GraphqlResponse, MenuPayload, PageListItem, PagePayload,
    SectionComponentsPayload,
};

use crate::application::error::{QueryError, SourceError};
use crate::application::ports::{ContentSource, GraphqlTransport};
use crate::cache::QueryBatcher;
use crate::config::BackendSettings;

use super::error::InfraError;

const LIST_PAGES: &str = "query ListPages($tenant: String!, $locale: String!) { \
    listPages(tenant: $tenant, locale: $locale) { id slug locale } }";

const LOAD_PAGE: &str = "query LoadPage($slug: String!, $locale: String!) { \
    loadPage(slug: $slug, locale: $locale) { \
    page { id slug locale title pageType \
    sections { id title order backgroundImage backgroundType } } \
    sections { components { id type data } } } }";

const SECTION_COMPONENTS: &str = "query SectionComponents($sectionId: ID!) { \
    sectionComponents(sectionId: $sectionId) { components { id type data } lastUpdated } }";

const FETCH_MENUS: &str = "query FetchMenus { \
    fetchMenus { id name items { label href children { label href } } } }";

const PRELOAD_MEDIA: &str = "mutation PreloadMedia($sectionIds: [ID!]!) { \
    preloadMedia(sectionIds: $sectionIds) }";

/// Posts GraphQL documents over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
    batching: bool,
}

impl HttpTransport {
    pub fn new(settings: &BackendSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_token: settings.api_token.clone(),
            batching: settings.supports_batching,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("vitrine/", env!("CARGO_PKG_VERSION"))
    }

    fn post(&self) -> RequestBuilder {
        let request = self.client.post(self.endpoint.clone());
        match self.api_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<B, T>(&self, body: &B) -> Result<T, QueryError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .post()
            .json(body)
            .send()
            .await
            .map_err(QueryError::transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(QueryError::transport)?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(QueryError::Transport(format!("status {status} body {text}")));
        }
        serde_json::from_slice(&bytes).map_err(|err| QueryError::decode("graphql", err))
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn execute(&self, request: GraphqlRequest) -> Result<Value, QueryError> {
        let response: GraphqlResponse = self.send(&request).await?;
        into_data(response)
    }

    async fn execute_batch(
        &self,
        requests: Vec<GraphqlRequest>,
    ) -> Result<Vec<Result<Value, QueryError>>, QueryError> {
        debug!(size = requests.len(), "posting batched graphql request");
        let responses: Vec<GraphqlResponse> = self.send(&requests).await?;
        Ok(responses.into_iter().map(into_data).collect())
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }
}

/// Unwrap a response envelope into its `data`, surfacing GraphQL errors.
pub fn into_data(response: GraphqlResponse) -> Result<Value, QueryError> {
    if !response.errors.is_empty() {
        return Err(QueryError::Graphql {
            messages: response
                .errors
                .into_iter()
                .map(|error| error.message)
                .collect(),
        });
    }
    response.data.ok_or(QueryError::Malformed {
        operation: "graphql",
        field: "data",
    })
}

fn take_field<T: DeserializeOwned>(
    data: Value,
    operation: &'static str,
    field: &'static str,
) -> Result<T, QueryError> {
    let Value::Object(mut object) = data else {
        return Err(QueryError::Malformed {
            operation,
            field: "data",
        });
    };
    let value = object
        .remove(field)
        .ok_or(QueryError::Malformed { operation, field })?;
    serde_json::from_value(value).map_err(|err| QueryError::decode(operation, err))
}

/// [`ContentSource`] speaking the backend's GraphQL schema.
///
/// All operations go through the shared [`QueryBatcher`].
#[derive(Clone)]
pub struct GraphqlContentSource {
    batcher: QueryBatcher,
}

impl GraphqlContentSource {
    pub fn new(batcher: QueryBatcher) -> Self {
        Self { batcher }
    }

    pub fn from_transport(
        transport: Arc<dyn GraphqlTransport>,
        window: std::time::Duration,
    ) -> Self {
        Self::new(QueryBatcher::new(transport, window))
    }
}

#[async_trait]
impl ContentSource for GraphqlContentSource {
    async fn list_pages(
        &self,
        tenant: &str,
        locale: &str,
    ) -> Result<Vec<PageListItem>, SourceError> {
        let data = self
            .batcher
            .schedule(LIST_PAGES, json!({ "tenant": tenant, "locale": locale }))
            .await?;
        Ok(take_field(data, "listPages", "listPages")?)
    }

    async fn load_page(&self, locale: &str, slug: &str) -> Result<PagePayload, SourceError> {
        let data = self
            .batcher
            .schedule(LOAD_PAGE, json!({ "slug": slug, "locale": locale }))
            .await?;
        let page: Option<PagePayload> = take_field(data, "loadPage", "loadPage")?;
        page.ok_or_else(|| SourceError::NotFound {
            slug: slug.to_string(),
        })
    }

    async fn fetch_section_components(
        &self,
        section_id: &str,
    ) -> Result<SectionComponentsPayload, SourceError> {
        let data = self
            .batcher
            .schedule(SECTION_COMPONENTS, json!({ "sectionId": section_id }))
            .await?;
        Ok(take_field(data, "sectionComponents", "sectionComponents")?)
    }

    async fn fetch_menus(&self) -> Result<Vec<MenuPayload>, SourceError> {
        let data = self.batcher.schedule(FETCH_MENUS, Value::Null).await?;
        Ok(take_field(data, "fetchMenus", "fetchMenus")?)
    }

    async fn preload_media(&self, section_ids: &[String]) -> Result<(), SourceError> {
        self.batcher
            .schedule(PRELOAD_MEDIA, json!({ "sectionIds": section_ids }))
            .await?;
        Ok(())
    }
}
