//! Request execution.
//!
//! [`RequestExecutor`] turns a [`ServiceRequest`] into gateway calls:
//!
//! 1. build: derive the partition key, attach the session token, sign;
//! 2. dispatch through the [`GatewayTransport`];
//! 3. capture the response's session token, or clear tokens after a
//!    collection or database delete;
//! 4. on failure, hand the error to the retry layers.
//!
//! Two retry layers are stacked. The inner one wraps a single build+dispatch
//! with [`RequestRetryPolicy`]. Document writes whose partition key is derived
//! from the collection definition are additionally wrapped in an outer layer
//! with [`PartitionKeyMismatchPolicy`], which re-runs the inner layer from
//! scratch. Both layers share one [`AttemptBudget`] so the safety ceiling
//! bounds the real number of dispatches.

use crate::auth::RequestSigner;
use crate::config::{ClientConfig, ConsistencyLevel, RetryOptions};
use crate::constants::headers;
use crate::endpoint::EndpointManager;
use crate::error::{Error, Result};
use crate::gateway::{GatewayTransport, ServiceResponse};
use crate::observability::{OperationPhase, RequestMetadata, RequestTimer, ResponseMetadata};
use crate::policy::{PartitionKeyMismatchPolicy, RequestRetryPolicy};
use crate::request::{OperationKind, RequestBody, ResourceType, ServiceRequest};
use crate::routing::CollectionCache;
use crate::session::SessionTokenStore;
use chrono::Utc;
use docdb_core::retry::{AbortSignal, AttemptBudget, RetryDriver};
use http::HeaderMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs service requests with session tracking and retries.
pub struct RequestExecutor {
    gateway: Arc<GatewayTransport>,
    endpoints: Arc<dyn EndpointManager>,
    collections: Arc<dyn CollectionCache>,
    sessions: Arc<SessionTokenStore>,
    signer: Arc<RequestSigner>,
    retry: RetryOptions,
    discovery_enabled: bool,
    default_consistency: Option<ConsistencyLevel>,
    session_host: String,
    signing_permits: Option<Arc<Semaphore>>,
}

impl RequestExecutor {
    /// Assemble an executor from its collaborators.
    ///
    /// Session tokens are keyed by the account endpoint's host, so tokens
    /// observed in one region are presented in every other.
    pub fn new(
        gateway: Arc<GatewayTransport>,
        endpoints: Arc<dyn EndpointManager>,
        collections: Arc<dyn CollectionCache>,
        sessions: Arc<SessionTokenStore>,
        signer: Arc<RequestSigner>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let session_host = config
            .endpoint
            .as_ref()
            .and_then(|endpoint| endpoint.host_str())
            .ok_or_else(|| Error::Configuration("account endpoint has no host".into()))?
            .to_string();

        let signing_permits = config
            .signing_workers
            .filter(|workers| *workers > 0)
            .map(|workers| Arc::new(Semaphore::new(workers)));

        Ok(Self {
            gateway,
            endpoints,
            collections,
            sessions,
            signer,
            retry: config.retry.clone(),
            discovery_enabled: config.enable_endpoint_discovery,
            default_consistency: config.consistency_level,
            session_host,
            signing_permits,
        })
    }

    pub fn sessions(&self) -> &SessionTokenStore {
        &self.sessions
    }

    pub fn endpoints(&self) -> &Arc<dyn EndpointManager> {
        &self.endpoints
    }

    pub fn collections(&self) -> &Arc<dyn CollectionCache> {
        &self.collections
    }

    /// Execute `request` until it succeeds or the retry policies give up.
    pub async fn execute(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.run(request, None).await
    }

    /// Like [`execute`](Self::execute), but pending retry delays end early
    /// with [`Error::Aborted`] once `signal` fires.
    pub async fn execute_with_abort(&self, request: ServiceRequest, signal: AbortSignal) -> Result<ServiceResponse> {
        self.run(request, Some(signal)).await
    }

    async fn run(&self, request: ServiceRequest, abort: Option<AbortSignal>) -> Result<ServiceResponse> {
        let metadata = RequestMetadata::for_request(&request);
        let timer = RequestTimer::start();
        let budget = AttemptBudget::new();

        if let Err(e) = self.endpoints.initialize().await {
            warn!(error = %e, "endpoint discovery failed, using the account endpoint");
        }

        let result = if !request.body().is_replayable() {
            debug!(operation_id = %metadata.operation_id, "single-use body, retries disabled");
            self.dispatch(&request, &metadata, &budget, 1).await
        } else if let Some(collection_link) = self.derived_partition_key_collection(&request) {
            let mut advisor = PartitionKeyMismatchPolicy::new(
                Arc::clone(&self.collections),
                collection_link,
                request.operation(),
                false,
                self.retry.partition_key_mismatch_max_retries,
            );
            self.driver(&budget, abort.clone(), "partition_key")
                .run(&mut advisor, |_| {
                    self.run_with_retries(&request, &metadata, &budget, abort.clone())
                })
                .await
                .map_err(Error::from)
        } else {
            self.run_with_retries(&request, &metadata, &budget, abort)
                .await
        };

        let attempts = budget.spent();
        match result {
            Ok(response) => {
                metadata.log_phase(OperationPhase::Succeeded, attempts);
                ResponseMetadata::new(Some(response.status().as_u16()), timer.elapsed(), attempts)
                    .with_request_charge(response.request_charge())
                    .log_success(&metadata);
                Ok(response)
            }
            Err(error) => {
                metadata.log_phase(OperationPhase::Failed, attempts);
                ResponseMetadata::new(error.status().map(|s| s.as_u16()), timer.elapsed(), attempts)
                    .log_error(&metadata, &error);
                Err(error)
            }
        }
    }

    /// The inner retry layer: build and dispatch until [`RequestRetryPolicy`] gives up.
    async fn run_with_retries(
        &self,
        request: &ServiceRequest,
        metadata: &RequestMetadata,
        budget: &AttemptBudget,
        abort: Option<AbortSignal>,
    ) -> Result<ServiceResponse> {
        let mut advisor = RequestRetryPolicy::new(
            request.operation(),
            partition_key_pinned(request),
            Arc::clone(&self.endpoints),
            self.retry.clone(),
            self.discovery_enabled,
        );

        self.driver(budget, abort, "request")
            .run(&mut advisor, |attempt| async move {
                if attempt > 1 {
                    metadata.log_phase(OperationPhase::Retrying, attempt);
                }
                self.dispatch(request, metadata, budget, attempt).await
            })
            .await
            .map_err(Error::from)
    }

    fn driver(&self, budget: &AttemptBudget, abort: Option<AbortSignal>, label: &'static str) -> RetryDriver {
        let driver = RetryDriver::new(self.retry.safety_ceiling)
            .with_budget(budget.clone())
            .with_label(label);
        match abort {
            Some(signal) => driver.with_abort(signal),
            None => driver,
        }
    }

    /// One attempt: build a fresh copy of `request` and send it.
    async fn dispatch(
        &self,
        request: &ServiceRequest,
        metadata: &RequestMetadata,
        budget: &AttemptBudget,
        attempt: u32,
    ) -> Result<ServiceResponse> {
        metadata.log_phase(OperationPhase::Building, attempt);
        let prepared = self.prepare(request).await?;

        metadata.log_phase(OperationPhase::Dispatching, attempt);
        budget.record();

        match self.gateway.execute(&prepared).await {
            Ok(response) => {
                if matches!(
                    prepared.resource_type(),
                    ResourceType::Collection | ResourceType::Database
                ) && prepared.operation() == OperationKind::Delete
                {
                    self.sessions.clear_token(&self.session_host, &prepared);
                } else {
                    self.sessions
                        .capture_session_token(&self.session_host, &prepared, response.headers());
                }
                Ok(response)
            }
            Err(error) => {
                if let Some(service) = error.service_error()
                    && !service.is_timeout()
                {
                    self.sessions
                        .capture_session_token(&self.session_host, &prepared, service.headers());
                }
                Err(error)
            }
        }
    }

    /// Finalize headers for one attempt.
    async fn prepare(&self, request: &ServiceRequest) -> Result<ServiceRequest> {
        let mut prepared = request.clone();

        if let Some(key) = prepared.partition_key() {
            let value = key.to_header_value()?;
            prepared.headers_mut().insert(headers::PARTITION_KEY, value);
        } else if let Some(collection_link) = self.derived_partition_key_collection(&prepared) {
            self.derive_partition_key(&mut prepared, &collection_link).await?;
        }

        self.sessions
            .apply_session_token(&self.session_host, &mut prepared, self.default_consistency);
        self.sign(&mut prepared).await?;
        Ok(prepared)
    }

    /// Collection whose definition supplies the partition key of `request`, if
    /// the key has to be derived from the body.
    fn derived_partition_key_collection(&self, request: &ServiceRequest) -> Option<String> {
        if request.resource_type() != ResourceType::Document
            || !request.operation().writes_document_body()
            || partition_key_pinned(request)
        {
            return None;
        }
        request.collection_link().map(str::to_string)
    }

    async fn derive_partition_key(&self, request: &mut ServiceRequest, collection_link: &str) -> Result<()> {
        let RequestBody::Bytes(body) = request.body() else {
            return Ok(());
        };
        let document: serde_json::Value = serde_json::from_slice(body)?;

        let collection = self.collections.resolve_collection(collection_link).await?;
        if let Some(key) = collection.extract_partition_key(&document) {
            let value = key.to_header_value()?;
            request.headers_mut().insert(headers::PARTITION_KEY, value);
        }
        Ok(())
    }

    /// Stamp the date and authorization headers.
    ///
    /// With signing workers configured the HMAC runs on the blocking pool,
    /// at most `signing_workers` at a time; otherwise inline.
    async fn sign(&self, request: &mut ServiceRequest) -> Result<()> {
        let method = request.operation().method();
        let resource_type = request.resource_type();
        let link = request.address().link().to_string();
        let at = Utc::now();

        let Some(permits) = &self.signing_permits else {
            return self
                .signer
                .sign_headers(request.headers_mut(), &method, resource_type, &link, at);
        };

        let _permit = permits
            .acquire()
            .await
            .map_err(|e| Error::Other(anyhow::Error::new(e).context("signing pool closed")))?;
        let signer = Arc::clone(&self.signer);
        let signed = tokio::task::spawn_blocking(move || {
            let mut signed = HeaderMap::new();
            signer
                .sign_headers(&mut signed, &method, resource_type, &link, at)
                .map(|()| signed)
        })
        .await
        .map_err(|e| Error::Other(anyhow::Error::new(e).context("signing task failed")))??;

        request.headers_mut().extend(signed);
        Ok(())
    }
}

/// Whether the caller fixed the partition key, either through
/// [`ServiceRequest::with_partition_key`] or by setting the header directly.
fn partition_key_pinned(request: &ServiceRequest) -> bool {
    request.is_partition_key_pinned() || request.headers().contains_key(headers::PARTITION_KEY)
}
