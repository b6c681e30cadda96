use super::RetryPolicyKind;
use crate::error::{Error, Result, ServiceError};
use crate::request::OperationKind;
use crate::routing::CollectionCache;
use async_trait::async_trait;
use docdb_core::retry::{RetryAdvisor, RetryDecision};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Outer advisor for document writes whose partition key was derived from a
/// cached collection definition.
///
/// A 400 / partition-key-mismatch means the cached definition is stale. The
/// policy refreshes the collection entry and asks for the whole operation to be
/// run again, which re-resolves the collection and re-extracts the key.
pub struct PartitionKeyMismatchPolicy {
    cache: Arc<dyn CollectionCache>,
    collection_link: String,
    operation: OperationKind,
    partition_key_pinned: bool,
    max_retries: u32,
    retries: u32,
    observed_generation: u64,
}

impl PartitionKeyMismatchPolicy {
    pub fn new(
        cache: Arc<dyn CollectionCache>,
        collection_link: impl Into<String>,
        operation: OperationKind,
        partition_key_pinned: bool,
        max_retries: u32,
    ) -> Self {
        let collection_link = collection_link.into();
        let observed_generation = cache.generation(&collection_link);
        Self {
            cache,
            collection_link,
            operation,
            partition_key_pinned,
            max_retries,
            retries: 0,
            observed_generation,
        }
    }

    /// Refreshes made so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    async fn decide(&mut self, error: &ServiceError, attempt: u32) -> Result<RetryDecision> {
        let kind = RetryPolicyKind::select(
            error.status(),
            error.sub_status(),
            self.operation,
            self.partition_key_pinned,
        );
        if kind != RetryPolicyKind::PartitionKeyMismatch || self.retries >= self.max_retries {
            return Ok(RetryDecision::Stop);
        }

        self.cache
            .refresh(&self.collection_link, self.observed_generation)
            .await?;
        self.observed_generation = self.cache.generation(&self.collection_link);
        self.retries += 1;

        warn!(
            policy = %kind,
            attempt,
            collection = %self.collection_link,
            "partition key definition was stale, retrying"
        );
        Ok(RetryDecision::retry_now())
    }
}

#[async_trait]
impl RetryAdvisor<Error> for PartitionKeyMismatchPolicy {
    type Failure = ServiceError;

    async fn on_failure(&mut self, failure: &ServiceError, attempt: u32) -> Result<RetryDecision> {
        self.decide(failure, attempt).await
    }
}

impl fmt::Debug for PartitionKeyMismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionKeyMismatchPolicy")
            .field("collection_link", &self.collection_link)
            .field("operation", &self.operation)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
