//! Regional endpoint routing.
//!
//! A multi-region account exposes one endpoint per region. Writes go to the
//! first writable region, reads to the first readable region in the caller's
//! preference order. When a region stops accepting writes, or a read region
//! has not caught up, the retry policies ask the [`EndpointManager`] to refresh
//! the topology or move reads to the next region.

use crate::auth::RequestSigner;
use crate::constants::{API_VERSION, headers};
use crate::error::{Result, ServiceError};
use crate::request::{OperationKind, ResourceType};
use async_trait::async_trait;
use chrono::Utc;
use docdb_transport::{HttpRequest, Transport};
use http::{HeaderName, HeaderValue, Method};
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Source of regional endpoints for the executor and the retry policies.
#[async_trait]
pub trait EndpointManager: Send + Sync {
    /// Endpoint that accepts writes.
    fn write_endpoint(&self) -> Url;

    /// Endpoint currently used for reads.
    fn read_endpoint(&self) -> Url;

    /// Endpoint for an operation: reads to the read endpoint, the rest to the write endpoint.
    fn resolve_service_endpoint(&self, operation: OperationKind) -> Url {
        if operation.is_read_only() {
            self.read_endpoint()
        } else {
            self.write_endpoint()
        }
    }

    /// Number of regions reads can be served from (at least 1).
    fn read_location_count(&self) -> usize;

    /// Bumped on every topology change.
    fn generation(&self) -> u64;

    /// Move reads to the next readable region.
    fn rotate_read_endpoint(&self);

    /// Reload the topology unless it changed since `observed_generation`.
    async fn refresh(&self, observed_generation: u64) -> Result<()>;

    /// Load the initial topology. Called before the first dispatch.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }
}

/// A region and its endpoint, as listed in the account document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLocation {
    pub name: String,
    pub database_account_endpoint: String,
}

/// The regions of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTopology {
    #[serde(default)]
    pub writable_locations: Vec<AccountLocation>,
    #[serde(default)]
    pub readable_locations: Vec<AccountLocation>,
}

/// Fetches the account topology.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn fetch(&self, endpoint: &Url) -> Result<AccountTopology>;
}

/// Reads the database account document from the gateway.
pub struct GatewayTopologySource {
    transport: Arc<dyn Transport>,
    signer: Arc<RequestSigner>,
    timeout: Duration,
}

impl GatewayTopologySource {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<RequestSigner>, timeout: Duration) -> Self {
        Self {
            transport,
            signer,
            timeout,
        }
    }
}

#[async_trait]
impl TopologySource for GatewayTopologySource {
    async fn fetch(&self, endpoint: &Url) -> Result<AccountTopology> {
        let mut request = HttpRequest::new(Method::GET, endpoint.clone())
            .with_header(
                HeaderName::from_static(headers::VERSION),
                HeaderValue::from_static(API_VERSION),
            )
            .with_timeout(self.timeout);
        self.signer.sign_headers(
            &mut request.headers,
            &Method::GET,
            ResourceType::DatabaseAccount,
            "",
            Utc::now(),
        )?;

        let response = self.transport.send_http(request).await?;
        if !response.is_success() {
            let status = response.status;
            let headers = response.headers;
            let text = response.body.into_text().await?;
            return Err(ServiceError::from_response(status, headers, &text).into());
        }

        Ok(response.body.into_json().await?)
    }
}

#[derive(Debug)]
struct EndpointState {
    write_endpoints: Vec<Url>,
    read_endpoints: Vec<Url>,
    read_index: usize,
    generation: u64,
    /// Start of the last fetch, whether it succeeded or not
    last_attempt: Option<Instant>,
}

/// [`EndpointManager`] that orders regions by preference and refreshes from a [`TopologySource`].
///
/// Refreshes are single-flight: a caller passes the generation it observed, and
/// if another caller already moved past it the refresh is skipped. Fetches,
/// failed ones included, are also spaced at least `min_refresh_interval` apart.
pub struct GlobalEndpointManager {
    default_endpoint: Url,
    preferred_locations: Vec<String>,
    discovery_enabled: bool,
    min_refresh_interval: Duration,
    source: Arc<dyn TopologySource>,
    state: RwLock<EndpointState>,
    refresh_lock: Mutex<()>,
}

impl GlobalEndpointManager {
    pub fn new(default_endpoint: Url, source: Arc<dyn TopologySource>) -> Self {
        Self {
            state: RwLock::new(EndpointState {
                write_endpoints: vec![default_endpoint.clone()],
                read_endpoints: vec![default_endpoint.clone()],
                read_index: 0,
                generation: 0,
                last_attempt: None,
            }),
            default_endpoint,
            preferred_locations: Vec::new(),
            discovery_enabled: true,
            min_refresh_interval: Duration::from_secs(5),
            source,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Regions to try first, in order.
    pub fn with_preferred_locations(mut self, locations: Vec<String>) -> Self {
        self.preferred_locations = locations;
        self
    }

    /// When disabled, every request goes to the account endpoint and refreshes are no-ops.
    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.discovery_enabled = enabled;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    fn order(&self, locations: &[AccountLocation]) -> Vec<Url> {
        let mut ordered: Vec<&AccountLocation> = Vec::with_capacity(locations.len());
        for preferred in &self.preferred_locations {
            ordered.extend(
                locations
                    .iter()
                    .filter(|l| l.name.eq_ignore_ascii_case(preferred)),
            );
        }
        for location in locations {
            if !ordered.iter().any(|l| l.name == location.name) {
                ordered.push(location);
            }
        }

        let mut endpoints: Vec<Url> = ordered
            .into_iter()
            .filter_map(|location| match Url::parse(&location.database_account_endpoint) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(location = %location.name, error = %e, "ignoring invalid regional endpoint");
                    None
                }
            })
            .collect();
        endpoints.dedup();

        if endpoints.is_empty() {
            endpoints.push(self.default_endpoint.clone());
        }
        endpoints
    }

    fn apply(&self, topology: &AccountTopology) {
        let write_endpoints = self.order(&topology.writable_locations);
        let read_endpoints = self.order(&topology.readable_locations);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.write_endpoints = write_endpoints;
        state.read_endpoints = read_endpoints;
        state.read_index = 0;
        state.generation += 1;

        info!(
            generation = state.generation,
            write = %state.write_endpoints[0],
            read = %state.read_endpoints[0],
            "endpoint topology refreshed"
        );
    }
}

#[async_trait]
impl EndpointManager for GlobalEndpointManager {
    fn write_endpoint(&self) -> Url {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .write_endpoints
            .first()
            .cloned()
            .unwrap_or_else(|| self.default_endpoint.clone())
    }

    fn read_endpoint(&self) -> Url {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .read_endpoints
            .get(state.read_index)
            .cloned()
            .unwrap_or_else(|| self.default_endpoint.clone())
    }

    fn read_location_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.read_endpoints.len().max(1)
    }

    fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    fn rotate_read_endpoint(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let count = state.read_endpoints.len().max(1);
        state.read_index = (state.read_index + 1) % count;
        debug!(read_index = state.read_index, "rotated read endpoint");
    }

    async fn refresh(&self, observed_generation: u64) -> Result<()> {
        if !self.discovery_enabled {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;

        let last_attempt = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.generation > observed_generation {
                debug!(
                    observed = observed_generation,
                    current = state.generation,
                    "topology already refreshed"
                );
                return Ok(());
            }
            state.last_attempt
        };

        if let Some(last) = last_attempt
            && last.elapsed() < self.min_refresh_interval
        {
            debug!("topology refresh rate limited");
            return Ok(());
        }

        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_attempt = Some(Instant::now());

        let topology = self.source.fetch(&self.default_endpoint).await?;
        self.apply(&topology);
        Ok(())
    }

    /// Fetches the topology until one fetch succeeds. A failed fetch is not
    /// repeated before `min_refresh_interval` has passed; until then requests
    /// keep going to the account endpoint.
    async fn initialize(&self) -> Result<()> {
        if !self.discovery_enabled || self.generation() > 0 {
            return Ok(());
        }
        self.refresh(0).await
    }
}
