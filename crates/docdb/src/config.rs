//! Configuration for the docdb client

use crate::auth::AuthorizationKey;
use crate::error::{Error, Result};
use docdb_core::retry::{ExponentialBackoff, RetryDriver};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Account consistency levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    Eventual,
    ConsistentPrefix,
}

impl ConsistencyLevel {
    /// Wire representation used in `x-ms-consistency-level`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
            Self::Session => "Session",
            Self::Eventual => "Eventual",
            Self::ConsistentPrefix => "ConsistentPrefix",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(Self::Strong),
            "boundedstaleness" => Ok(Self::BoundedStaleness),
            "session" => Ok(Self::Session),
            "eventual" => Ok(Self::Eventual),
            "consistentprefix" => Ok(Self::ConsistentPrefix),
            other => Err(Error::Configuration(format!(
                "unknown consistency level '{}'",
                other
            ))),
        }
    }
}

/// How query bodies are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryCompatibilityMode {
    /// Structured query spec as `application/query+json`
    #[default]
    Default,
    /// Same as `Default`; kept for gateways that expect it spelled out
    Query,
    /// Raw query text as `application/sql`, parameters are not sent
    SqlQuery,
}

/// Limits for the 429 throttling policy.
#[derive(Debug, Clone)]
pub struct ThrottleOptions {
    /// Total dispatches allowed for a throttled operation, including the first
    pub max_attempts: u32,

    /// Upper bound on the sum of all throttle delays
    pub max_cumulative_wait: Duration,

    /// Multiplier applied to the server's retry-after hint
    pub backoff_factor: f64,

    /// Delays used when the service sends no hint
    pub fallback_backoff: ExponentialBackoff,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            max_cumulative_wait: Duration::from_secs(30),
            backoff_factor: 1.0,
            fallback_backoff: ExponentialBackoff::default(),
        }
    }
}

/// Limits for the write-forbidden (endpoint discovery) policy.
#[derive(Debug, Clone)]
pub struct EndpointDiscoveryOptions {
    /// Retries after the first failure
    pub max_retries: u32,

    /// Delay before every retry
    pub retry_interval: Duration,

    /// Minimum time between two topology refreshes
    pub min_refresh_interval: Duration,
}

impl Default for EndpointDiscoveryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            min_refresh_interval: Duration::from_secs(5),
        }
    }
}

/// Retry limits for every policy, plus the driver's safety ceiling.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub throttle: ThrottleOptions,

    pub endpoint_discovery: EndpointDiscoveryOptions,

    /// Retries for a read session that is not yet available in the region.
    /// `None` means one per read location.
    pub session_read_max_retries: Option<u32>,

    /// Retries after refreshing the collection cache on a partition key mismatch
    pub partition_key_mismatch_max_retries: u32,

    /// Hard limit on dispatches per logical operation
    pub safety_ceiling: u32,

    /// Treat client-side timeouts of read-only operations like throttling
    pub retry_read_timeouts: bool,
}

impl RetryOptions {
    /// Check the limits.
    ///
    /// `safety_ceiling` counts every dispatch of a logical operation, across
    /// both retry layers. Per-policy counters do not: the throttle count starts
    /// over each time a partition key mismatch re-runs the operation. Whenever
    /// the ceiling is hit first the caller gets [`Error::RetriesExhausted`]
    /// wrapping the last failure instead of that failure itself. This is
    /// certain once `throttle.max_attempts` reaches `safety_ceiling`, so that
    /// combination is accepted but logged.
    pub fn validate(&self) -> Result<()> {
        if self.safety_ceiling == 0 {
            return Err(Error::Configuration("safety_ceiling must be at least 1".into()));
        }
        if self.throttle.max_attempts == 0 {
            return Err(Error::Configuration(
                "throttle max_attempts must be at least 1".into(),
            ));
        }
        if !(self.throttle.backoff_factor.is_finite() && self.throttle.backoff_factor >= 0.0) {
            return Err(Error::Configuration(
                "throttle backoff_factor must be a non-negative number".into(),
            ));
        }
        if self.throttle_reaches_ceiling() {
            warn!(
                throttle_max_attempts = self.throttle.max_attempts,
                safety_ceiling = self.safety_ceiling,
                "throttled operations will end at the safety ceiling"
            );
        }
        Ok(())
    }

    /// Whether a throttled operation is stopped by the safety ceiling before
    /// the throttle policy gives up.
    pub fn throttle_reaches_ceiling(&self) -> bool {
        self.throttle.max_attempts >= self.safety_ceiling
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            throttle: ThrottleOptions::default(),
            endpoint_discovery: EndpointDiscoveryOptions::default(),
            session_read_max_retries: None,
            partition_key_mismatch_max_retries: 1,
            safety_ceiling: RetryDriver::DEFAULT_CEILING,
            retry_read_timeouts: false,
        }
    }
}

/// Configuration for the document client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account endpoint, e.g. `https://myaccount.documents.example.com/`
    pub endpoint: Option<Url>,

    /// Master key or resource token
    pub key: Option<AuthorizationKey>,

    /// Default consistency level; `None` defers to the account default
    pub consistency_level: Option<ConsistencyLevel>,

    /// Query body encoding
    pub query_compatibility_mode: QueryCompatibilityMode,

    /// Timeout for a single wire call
    pub request_timeout: Duration,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Regions to prefer for reads (and writes on multi-master accounts), in order
    pub preferred_locations: Vec<String>,

    /// Discover regional endpoints from the account topology
    pub enable_endpoint_discovery: bool,

    pub retry: RetryOptions,

    /// Run request signing on the blocking pool with at most this many concurrent jobs
    pub signing_workers: Option<usize>,

    /// Appended to the default user agent
    pub user_agent_suffix: Option<String>,

    /// Responses with a status at or above this value are failures
    pub min_error_status: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            consistency_level: None,
            query_compatibility_mode: QueryCompatibilityMode::Default,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            preferred_locations: Vec::new(),
            enable_endpoint_discovery: true,
            retry: RetryOptions::default(),
            signing_workers: None,
            user_agent_suffix: None,
            min_error_status: 300,
        }
    }
}

impl ClientConfig {
    /// Configuration for `endpoint` authenticated with a master key.
    pub fn new(endpoint: &str, master_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Some(parse_endpoint(endpoint)?),
            key: Some(AuthorizationKey::master(master_key)),
            ..Default::default()
        })
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is read first if present. This will look for:
    /// - `DOCDB_ENDPOINT` for the account endpoint
    /// - `DOCDB_KEY` for the master key
    /// - `DOCDB_CONSISTENCY_LEVEL` for the default consistency level
    /// - `DOCDB_REQUEST_TIMEOUT` for the per-call timeout (in seconds)
    /// - `DOCDB_MAX_THROTTLE_ATTEMPTS` for the throttling attempt limit
    /// - `DOCDB_PREFERRED_LOCATIONS` for a comma-separated region list
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self> {
        use std::env;

        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(endpoint) = env::var("DOCDB_ENDPOINT") {
            config.endpoint = Some(parse_endpoint(&endpoint)?);
        }

        if let Ok(key) = env::var("DOCDB_KEY") {
            config.key = Some(AuthorizationKey::master(key));
        }

        if let Ok(level) = env::var("DOCDB_CONSISTENCY_LEVEL") {
            config.consistency_level = Some(level.parse()?);
        }

        if let Ok(timeout_str) = env::var("DOCDB_REQUEST_TIMEOUT")
            && let Ok(timeout_secs) = timeout_str.parse::<u64>()
        {
            config.request_timeout = Duration::from_secs(timeout_secs);
        }

        if let Ok(attempts_str) = env::var("DOCDB_MAX_THROTTLE_ATTEMPTS")
            && let Ok(attempts) = attempts_str.parse::<u32>()
        {
            config.retry.throttle.max_attempts = attempts;
        }

        if let Ok(locations) = env::var("DOCDB_PREFERRED_LOCATIONS") {
            config.preferred_locations = locations
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    /// Check that the configuration can drive a client.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_none() {
            return Err(Error::Configuration("endpoint is required".into()));
        }
        if self.key.is_none() {
            return Err(Error::Configuration("authorization key is required".into()));
        }
        self.retry.validate()?;
        if self.signing_workers == Some(0) {
            return Err(Error::Configuration(
                "signing_workers must be at least 1 when set".into(),
            ));
        }
        if !(100..=599).contains(&self.min_error_status) {
            return Err(Error::Configuration(format!(
                "min_error_status {} is not an HTTP status",
                self.min_error_status
            )));
        }
        Ok(())
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> String {
        let base = format!("docdb-rs/{}", crate::VERSION);
        match &self.user_agent_suffix {
            Some(suffix) if !suffix.is_empty() => format!("{} {}", base, suffix),
            _ => base,
        }
    }
}

/// Parse an account endpoint, requiring an absolute http(s) URL.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| Error::Configuration(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Configuration(format!(
            "endpoint '{}' must be an http(s) URL",
            endpoint
        )));
    }
    Ok(url)
}
