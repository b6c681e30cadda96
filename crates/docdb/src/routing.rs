//! Collection metadata and partition key extraction.
//!
//! Writes must name the partition key of the document they carry. Unless the
//! caller pins it, the executor reads the collection's partition key
//! definition from a [`CollectionCache`] and extracts the value from the body.
//! A stale definition (the collection was recreated with another key) is
//! detected by the service and repaired by refreshing the cache.

use crate::auth::RequestSigner;
use crate::error::Result;
use crate::gateway::GatewayTransport;
use crate::request::{OperationKind, PartitionKey, ResourceType, ServiceRequest};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Partition key definition of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PartitionKeyDefinition {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// The parts of a collection resource the client needs for routing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CollectionMetadata {
    pub id: String,
    #[serde(rename = "_rid", default)]
    pub rid: String,
    #[serde(rename = "partitionKey", default)]
    pub partition_key: Option<PartitionKeyDefinition>,
}

impl CollectionMetadata {
    /// Paths such as `/tenantId` that make up the partition key.
    pub fn partition_key_paths(&self) -> &[String] {
        self.partition_key
            .as_ref()
            .map(|definition| definition.paths.as_slice())
            .unwrap_or_default()
    }

    /// Partition key of `document`, or `None` for unpartitioned collections.
    ///
    /// A document that lacks the key property gets the undefined key.
    pub fn extract_partition_key(&self, document: &serde_json::Value) -> Option<PartitionKey> {
        let path = self.partition_key_paths().first()?;

        let mut current = document;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let segment = segment.trim_matches('"');
            match current.get(segment) {
                Some(next) => current = next,
                None => return Some(PartitionKey::undefined()),
            }
        }

        Some(match current {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => PartitionKey::undefined(),
            value => PartitionKey::from(value.clone()),
        })
    }
}

/// Resolves collection metadata for request routing.
#[async_trait]
pub trait CollectionCache: Send + Sync {
    /// Metadata for `dbs/{db}/colls/{coll}`, loading it on first use.
    async fn resolve_collection(&self, collection_link: &str) -> Result<Arc<CollectionMetadata>>;

    /// Reload the entry unless it changed since `observed_generation`.
    async fn refresh(&self, collection_link: &str, observed_generation: u64) -> Result<()>;

    /// Bumped every time the entry for `collection_link` is reloaded.
    fn generation(&self, collection_link: &str) -> u64;
}

/// Loads a collection resource.
#[async_trait]
pub trait CollectionLoader: Send + Sync {
    async fn load(&self, collection_link: &str) -> Result<CollectionMetadata>;
}

/// Reads collections through the gateway.
pub struct GatewayCollectionLoader {
    gateway: Arc<GatewayTransport>,
    signer: Arc<RequestSigner>,
}

impl GatewayCollectionLoader {
    pub fn new(gateway: Arc<GatewayTransport>, signer: Arc<RequestSigner>) -> Self {
        Self { gateway, signer }
    }
}

#[async_trait]
impl CollectionLoader for GatewayCollectionLoader {
    async fn load(&self, collection_link: &str) -> Result<CollectionMetadata> {
        let mut request =
            ServiceRequest::new(OperationKind::Read, ResourceType::Collection, collection_link)?;
        let link = request.address().link().to_string();
        self.signer.sign_headers(
            request.headers_mut(),
            &OperationKind::Read.method(),
            ResourceType::Collection,
            &link,
            Utc::now(),
        )?;

        let response = self.gateway.execute(&request).await?;
        response.json()
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    metadata: Option<Arc<CollectionMetadata>>,
    generation: u64,
    /// Serializes loads and refreshes of this collection only
    gate: Arc<Mutex<()>>,
}

/// In-memory [`CollectionCache`] with single-flight loads and refreshes per collection.
pub struct CollectionRoutingCache {
    loader: Arc<dyn CollectionLoader>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CollectionRoutingCache {
    pub fn new(loader: Arc<dyn CollectionLoader>) -> Self {
        Self {
            loader,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn gate(&self, collection_link: &str) -> Arc<Mutex<()>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&entries.entry(collection_link.to_string()).or_default().gate)
    }

    fn cached(&self, collection_link: &str) -> Option<Arc<CollectionMetadata>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection_link)
            .and_then(|entry| entry.metadata.clone())
    }

    fn store(&self, collection_link: &str, metadata: Arc<CollectionMetadata>, bump: bool) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(collection_link.to_string()).or_default();
        entry.metadata = Some(metadata);
        if bump {
            entry.generation += 1;
        }
    }
}

#[async_trait]
impl CollectionCache for CollectionRoutingCache {
    async fn resolve_collection(&self, collection_link: &str) -> Result<Arc<CollectionMetadata>> {
        if let Some(metadata) = self.cached(collection_link) {
            return Ok(metadata);
        }

        let gate = self.gate(collection_link);
        let _guard = gate.lock().await;
        if let Some(metadata) = self.cached(collection_link) {
            return Ok(metadata);
        }

        debug!(collection = collection_link, "loading collection metadata");
        let metadata = Arc::new(self.loader.load(collection_link).await?);
        self.store(collection_link, Arc::clone(&metadata), false);
        Ok(metadata)
    }

    async fn refresh(&self, collection_link: &str, observed_generation: u64) -> Result<()> {
        let gate = self.gate(collection_link);
        let _guard = gate.lock().await;
        if self.generation(collection_link) > observed_generation {
            debug!(collection = collection_link, "collection metadata already refreshed");
            return Ok(());
        }

        let metadata = Arc::new(self.loader.load(collection_link).await?);
        self.store(collection_link, metadata, true);
        info!(
            collection = collection_link,
            generation = self.generation(collection_link),
            "collection metadata refreshed"
        );
        Ok(())
    }

    fn generation(&self, collection_link: &str) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection_link)
            .map_or(0, |entry| entry.generation)
    }
}
