//! Document client

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    auth::{AuthorizationKey, RequestSigner},
    config::{ClientConfig, ConsistencyLevel, RetryOptions, parse_endpoint},
    constants::headers,
    endpoint::{EndpointManager, GatewayTopologySource, GlobalEndpointManager},
    error::{Error, Result},
    executor::RequestExecutor,
    gateway::{GatewayOptions, GatewayTransport, ServiceResponse},
    request::{OperationKind, PartitionKey, QuerySpec, ResourceType, ServiceRequest},
    routing::{CollectionRoutingCache, GatewayCollectionLoader},
    session::SessionTokenStore,
};
use docdb_core::retry::AbortSignal;
use docdb_transport::{HttpTransport, HttpTransportConfig, Transport};

/// Client for one database account.
///
/// Cloning is cheap; clones share the connection pool, the session tokens
/// and the routing caches.
///
/// # Example
///
/// ```rust,no_run
/// use docdb::DocumentClient;
/// use serde_json::json;
///
/// # async fn example() -> docdb::Result<()> {
/// let client = DocumentClient::builder()
///     .endpoint("https://myaccount.documents.example.com/")
///     .master_key("c2VjcmV0")
///     .build()?;
///
/// client
///     .create_document("dbs/app/colls/orders", &json!({"id": "1", "tenant": "acme"}), Default::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DocumentClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    executor: RequestExecutor,
    config: ClientConfig,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Partition key to send instead of deriving it from the document
    pub partition_key: Option<PartitionKey>,
    /// Consistency override for this call
    pub consistency_level: Option<ConsistencyLevel>,
    /// Explicit session token; replaces the tracked one
    pub session_token: Option<String>,
    /// Continuation token of the feed page to read
    pub continuation: Option<String>,
    /// Page size for queries and feeds
    pub max_item_count: Option<u32>,
}

impl RequestOptions {
    pub fn with_partition_key(mut self, key: impl Into<PartitionKey>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = Some(level);
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.continuation = Some(continuation.into());
        self
    }

    fn apply(self, mut request: ServiceRequest) -> Result<ServiceRequest> {
        if let Some(key) = self.partition_key {
            request = request.with_partition_key(key);
        }
        if let Some(level) = self.consistency_level {
            request = request.with_consistency_level(level);
        }
        if let Some(token) = self.session_token {
            request = request.with_header(HeaderName::from_static(headers::SESSION_TOKEN), header_value(&token)?);
        }
        if let Some(continuation) = self.continuation {
            request = request.with_header(
                HeaderName::from_static(headers::CONTINUATION),
                header_value(&continuation)?,
            );
        }
        if let Some(count) = self.max_item_count {
            request = request.with_header(
                HeaderName::from_static(headers::MAX_ITEM_COUNT),
                HeaderValue::from(count),
            );
        }
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::invalid(format!("'{}' is not a valid header value", value)))
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct FeedPage<T> {
    pub items: Vec<T>,
    /// Pass back through [`RequestOptions::continuation`] for the next page
    pub continuation: Option<String>,
    pub request_charge: Option<f64>,
    pub session_token: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
struct FeedBody<T> {
    #[serde(rename = "Documents", default)]
    documents: Vec<T>,
}

impl DocumentClient {
    /// Create a client for `endpoint` authenticated with a master key.
    pub fn new(endpoint: impl Into<String>, master_key: impl Into<String>) -> Result<Self> {
        Self::builder().endpoint(endpoint).master_key(master_key).build()
    }

    /// Create a new client builder for advanced configuration.
    pub fn builder() -> DocumentClientBuilder {
        DocumentClientBuilder::default()
    }

    /// Create a client from `DOCDB_*` environment variables.
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Create a client from a configuration object.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        DocumentClientBuilder::default().config(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Session tokens tracked by this client.
    pub fn sessions(&self) -> &SessionTokenStore {
        self.inner.executor.sessions()
    }

    /// Run an arbitrary request through the retry pipeline.
    pub async fn execute(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.inner.executor.execute(request).await
    }

    /// Run a request whose retry delays end early when `signal` fires.
    pub async fn execute_with_abort(&self, request: ServiceRequest, signal: AbortSignal) -> Result<ServiceResponse> {
        self.inner.executor.execute_with_abort(request, signal).await
    }

    /// Create a document in `collection_link` (`dbs/{db}/colls/{coll}`).
    pub async fn create_document<T: Serialize + ?Sized>(
        &self,
        collection_link: &str,
        document: &T,
        options: RequestOptions,
    ) -> Result<ServiceResponse> {
        let request = ServiceRequest::with_resource(
            OperationKind::Create,
            ResourceType::Document,
            &feed_path(collection_link, ResourceType::Document),
            document,
        )?;
        self.execute(options.apply(request)?).await
    }

    /// Create or replace a document in `collection_link`.
    pub async fn upsert_document<T: Serialize + ?Sized>(
        &self,
        collection_link: &str,
        document: &T,
        options: RequestOptions,
    ) -> Result<ServiceResponse> {
        let request = ServiceRequest::with_resource(
            OperationKind::Upsert,
            ResourceType::Document,
            &feed_path(collection_link, ResourceType::Document),
            document,
        )?;
        self.execute(options.apply(request)?).await
    }

    /// Replace the document at `document_link`.
    pub async fn replace_document<T: Serialize + ?Sized>(
        &self,
        document_link: &str,
        document: &T,
        options: RequestOptions,
    ) -> Result<ServiceResponse> {
        let request =
            ServiceRequest::with_resource(OperationKind::Replace, ResourceType::Document, document_link, document)?;
        self.execute(options.apply(request)?).await
    }

    /// Read the document at `document_link`.
    pub async fn read_document<T: DeserializeOwned>(&self, document_link: &str, options: RequestOptions) -> Result<T> {
        let request = ServiceRequest::new(OperationKind::Read, ResourceType::Document, document_link)?;
        self.execute(options.apply(request)?).await?.json()
    }

    pub async fn delete_document(&self, document_link: &str, options: RequestOptions) -> Result<ServiceResponse> {
        let request = ServiceRequest::new(OperationKind::Delete, ResourceType::Document, document_link)?;
        self.execute(options.apply(request)?).await
    }

    /// Delete a collection. Session tokens tracked for it are dropped.
    pub async fn delete_collection(&self, collection_link: &str) -> Result<ServiceResponse> {
        let request = ServiceRequest::new(OperationKind::Delete, ResourceType::Collection, collection_link)?;
        self.execute(request).await
    }

    /// Run one page of a query over the documents of `collection_link`.
    ///
    /// Without a partition key in `options` the query may fan out across
    /// partitions.
    pub async fn query_documents<T: DeserializeOwned>(
        &self,
        collection_link: &str,
        query: impl Into<QuerySpec>,
        options: RequestOptions,
    ) -> Result<FeedPage<T>> {
        let mut request = ServiceRequest::with_query(
            ResourceType::Document,
            &feed_path(collection_link, ResourceType::Document),
            query,
        )?;
        if options.partition_key.is_none() {
            request = request.with_header(
                HeaderName::from_static(headers::ENABLE_CROSS_PARTITION),
                HeaderValue::from_static("True"),
            );
        }

        let response = self.execute(options.apply(request)?).await?;
        let body: FeedBody<T> = response.json()?;
        Ok(FeedPage {
            items: body.documents,
            continuation: response.continuation().map(str::to_string),
            request_charge: response.request_charge(),
            session_token: response.session_token().map(str::to_string),
        })
    }

    /// Reload the regional topology now.
    pub async fn refresh_topology(&self) -> Result<()> {
        let endpoints = self.inner.executor.endpoints();
        endpoints.refresh(endpoints.generation()).await
    }
}

fn feed_path(parent_link: &str, child: ResourceType) -> String {
    format!("{}/{}", parent_link.trim_end_matches('/'), child.path_segment())
}

/// Builder for creating a configured [`DocumentClient`].
#[derive(Default)]
pub struct DocumentClientBuilder {
    config: ClientConfig,
    endpoint: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

impl DocumentClientBuilder {
    /// Start from an existing configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the account endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Authenticate with the account master key (base64).
    pub fn master_key(mut self, key: impl Into<String>) -> Self {
        self.config.key = Some(AuthorizationKey::master(key));
        self
    }

    /// Authenticate with a resource token.
    pub fn resource_token(mut self, token: impl Into<String>) -> Self {
        self.config.key = Some(AuthorizationKey::resource_token(token));
        self
    }

    /// Set the default consistency level.
    pub fn consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.config.consistency_level = Some(level);
        self
    }

    /// Regions to prefer for reads, in order.
    pub fn preferred_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.preferred_locations = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-call timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Turn regional endpoint discovery on or off.
    pub fn endpoint_discovery(mut self, enabled: bool) -> Self {
        self.config.enable_endpoint_discovery = enabled;
        self
    }

    /// Replace the retry limits.
    pub fn retry_options(mut self, retry: RetryOptions) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sign requests on the blocking pool, at most `workers` at a time.
    pub fn signing_workers(mut self, workers: usize) -> Self {
        self.config.signing_workers = Some(workers);
        self
    }

    /// Append `suffix` to the user agent.
    pub fn user_agent_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.user_agent_suffix = Some(suffix.into());
        self
    }

    /// Use `transport` instead of the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client with the configured options.
    pub fn build(self) -> Result<DocumentClient> {
        let mut config = self.config;
        if let Some(endpoint) = self.endpoint {
            config.endpoint = Some(parse_endpoint(&endpoint)?);
        }
        config.validate()?;

        let account_endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Configuration("endpoint is required".into()))?;
        let key = config
            .key
            .as_ref()
            .ok_or_else(|| Error::Configuration("authorization key is required".into()))?;
        let signer = Arc::new(RequestSigner::new(key)?);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_config(HttpTransportConfig {
                timeout: config.request_timeout,
                connect_timeout: config.connect_timeout,
                user_agent: Some(config.user_agent()),
                ..Default::default()
            })?),
        };

        let topology = Arc::new(GatewayTopologySource::new(
            Arc::clone(&transport),
            Arc::clone(&signer),
            config.request_timeout,
        ));
        let endpoints: Arc<dyn EndpointManager> = Arc::new(
            GlobalEndpointManager::new(account_endpoint, topology)
                .with_preferred_locations(config.preferred_locations.clone())
                .with_discovery(config.enable_endpoint_discovery)
                .with_min_refresh_interval(config.retry.endpoint_discovery.min_refresh_interval),
        );

        let gateway = Arc::new(GatewayTransport::new(
            transport,
            Arc::clone(&endpoints),
            GatewayOptions::from_config(&config),
        ));
        let collections = Arc::new(CollectionRoutingCache::new(Arc::new(GatewayCollectionLoader::new(
            Arc::clone(&gateway),
            Arc::clone(&signer),
        ))));

        let executor = RequestExecutor::new(
            gateway,
            endpoints,
            collections,
            Arc::new(SessionTokenStore::new()),
            signer,
            &config,
        )?;

        Ok(DocumentClient {
            inner: Arc::new(ClientInner { executor, config }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = DocumentClient::builder()
            .endpoint("https://acct.example.com/")
            .master_key("c2VjcmV0")
            .consistency_level(ConsistencyLevel::Session)
            .preferred_locations(["East US", "West US"])
            .request_timeout(Duration::from_secs(30))
            .signing_workers(2)
            .build()
            .unwrap();

        assert_eq!(client.config().consistency_level, Some(ConsistencyLevel::Session));
        assert_eq!(client.config().preferred_locations.len(), 2);
        assert_eq!(client.config().signing_workers, Some(2));
    }

    #[test]
    fn test_missing_endpoint() {
        let result = DocumentClient::builder().master_key("c2VjcmV0").build();
        assert!(matches!(result, Err(Error::Configuration(msg)) if msg.contains("endpoint")));
    }

    #[test]
    fn test_invalid_endpoint_scheme() {
        let result = DocumentClient::new("ftp://acct.example.com", "c2VjcmV0");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_master_key_must_be_base64() {
        let result = DocumentClient::new("https://acct.example.com/", "not base64!");
        assert!(matches!(result, Err(Error::Configuration(msg)) if msg.contains("base64")));
    }

    #[test]
    fn test_client_clone_shares_state() {
        let client1 = DocumentClient::new("https://acct.example.com/", "c2VjcmV0").unwrap();
        let client2 = client1.clone();
        assert!(std::ptr::eq(client1.sessions(), client2.sessions()));
    }

    #[test]
    fn test_options_set_headers() {
        let request = ServiceRequest::new(OperationKind::Read, ResourceType::Document, "dbs/d/colls/c/docs/1")
            .unwrap();
        let request = RequestOptions::default()
            .with_partition_key("acme")
            .with_session_token("0:5")
            .with_continuation("abc")
            .apply(request)
            .unwrap();

        assert!(request.is_partition_key_pinned());
        assert_eq!(request.header_str(headers::SESSION_TOKEN), Some("0:5"));
        assert_eq!(request.header_str(headers::CONTINUATION), Some("abc"));
    }

    #[test]
    fn test_feed_path() {
        assert_eq!(feed_path("dbs/d/colls/c/", ResourceType::Document), "dbs/d/colls/c/docs");
    }
}
