//! Session tokens and the per-client token store.
//!
//! Under session consistency every response carries the progress the client has
//! observed, as `x-ms-session-token`. Presenting that token on later requests
//! guarantees read-your-writes even when reads land in another region.
//!
//! A header value is a comma-separated list of `<rangeId>:<token>` pairs, one per
//! partition key range. A token is either a vector token
//! `<version>#<globalLsn>[#<regionId>=<localLsn>]*` or a bare LSN. Values that do
//! not follow the grammar are kept verbatim and replaced by whatever arrives next.

use crate::config::ConsistencyLevel;
use crate::constants::headers;
use crate::request::ServiceRequest;
use http::{HeaderMap, HeaderValue};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Progress marker for one partition key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionToken {
    /// `<version>#<globalLsn>#<region>=<lsn>...`
    Vector(VectorToken),
    /// A bare global LSN
    Lsn(u64),
    /// Anything else, stored and forwarded as-is
    Opaque(String),
}

/// Vector session token with per-region local LSNs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorToken {
    pub version: u64,
    pub global_lsn: u64,
    pub local_lsns: BTreeMap<u32, u64>,
}

impl SessionToken {
    /// Parse one token (the part after `<rangeId>:`).
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        Self::parse_structured(text).unwrap_or_else(|| Self::Opaque(text.to_string()))
    }

    fn parse_structured(text: &str) -> Option<Self> {
        if !text.contains('#') {
            return text.parse().ok().map(Self::Lsn);
        }

        let mut parts = text.split('#');
        let version = parts.next()?.parse().ok()?;
        let global_lsn = parts.next()?.parse().ok()?;
        let mut local_lsns = BTreeMap::new();
        for part in parts {
            let (region, lsn) = part.split_once('=')?;
            local_lsns.insert(region.parse().ok()?, lsn.parse().ok()?);
        }

        Some(Self::Vector(VectorToken {
            version,
            global_lsn,
            local_lsns,
        }))
    }

    /// Global LSN of a structured token.
    pub fn global_lsn(&self) -> Option<u64> {
        match self {
            Self::Vector(vector) => Some(vector.global_lsn),
            Self::Lsn(lsn) => Some(*lsn),
            Self::Opaque(_) => None,
        }
    }

    /// Combine two observations of the same range without going backwards.
    ///
    /// Vector tokens with different versions resolve to the higher version; equal
    /// versions take the maximum global LSN and the maximum local LSN per region.
    /// Bare LSNs take the maximum. Opaque tokens are replaced by `newer`.
    pub fn merge(&self, newer: &SessionToken) -> SessionToken {
        match (self, newer) {
            (Self::Vector(a), Self::Vector(b)) => match a.version.cmp(&b.version) {
                Ordering::Greater => self.clone(),
                Ordering::Less => newer.clone(),
                Ordering::Equal => {
                    let mut local_lsns = a.local_lsns.clone();
                    for (region, lsn) in &b.local_lsns {
                        let entry = local_lsns.entry(*region).or_insert(*lsn);
                        *entry = (*entry).max(*lsn);
                    }
                    Self::Vector(VectorToken {
                        version: a.version,
                        global_lsn: a.global_lsn.max(b.global_lsn),
                        local_lsns,
                    })
                }
            },
            (Self::Lsn(a), Self::Lsn(b)) => Self::Lsn((*a).max(*b)),
            (Self::Opaque(_), _) | (_, Self::Opaque(_)) => newer.clone(),
            // mixed formats: keep whichever has seen more
            _ => {
                if newer.global_lsn() > self.global_lsn() {
                    newer.clone()
                } else {
                    self.clone()
                }
            }
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector(vector) => {
                write!(f, "{}#{}", vector.version, vector.global_lsn)?;
                for (region, lsn) in &vector.local_lsns {
                    write!(f, "#{}={}", region, lsn)?;
                }
                Ok(())
            }
            Self::Lsn(lsn) => write!(f, "{}", lsn),
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

/// Tokens for every partition key range of one collection, keyed by range id.
pub type RangeTokens = BTreeMap<String, SessionToken>;

/// Parse a full `x-ms-session-token` header value.
///
/// A value that does not follow the `<rangeId>:<token>` list grammar is kept as a
/// single opaque token under the empty range id.
pub fn parse_session_header(value: &str) -> RangeTokens {
    let mut tokens = RangeTokens::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((range, token)) = entry.split_once(':') else {
            return opaque(value);
        };
        let token = SessionToken::parse(token);
        if range.is_empty() || matches!(token, SessionToken::Opaque(_)) {
            return opaque(value);
        }
        let merged = match tokens.get(range) {
            Some(existing) => existing.merge(&token),
            None => token,
        };
        tokens.insert(range.to_string(), merged);
    }
    tokens
}

fn opaque(value: &str) -> RangeTokens {
    let mut tokens = RangeTokens::new();
    let value = value.trim();
    if !value.is_empty() {
        tokens.insert(String::new(), SessionToken::Opaque(value.to_string()));
    }
    tokens
}

/// Render range tokens back into a header value, ordered by range id.
pub fn format_session_header(tokens: &RangeTokens) -> String {
    tokens
        .iter()
        .map(|(range, token)| {
            if range.is_empty() {
                token.to_string()
            } else {
                format!("{}:{}", range, token)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Key of the session store: account host plus collection link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionScope {
    pub host: String,
    pub collection: String,
}

impl SessionScope {
    pub fn new(host: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            collection: collection.into(),
        }
    }

    /// Scope of a request, if it lies inside a collection.
    pub fn for_request(host: &str, request: &ServiceRequest) -> Option<Self> {
        request
            .collection_link()
            .map(|collection| Self::new(host, collection))
    }
}

/// Session tokens observed by one client.
///
/// Every update is a read-modify-write under the write lock, so two responses
/// arriving concurrently both contribute to the stored token.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    tokens: RwLock<HashMap<SessionScope, RangeTokens>>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a header value into the tokens stored for `scope`.
    pub fn merge(&self, scope: &SessionScope, header_value: &str) {
        let observed = parse_session_header(header_value);
        if observed.is_empty() {
            return;
        }

        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let stored = tokens.entry(scope.clone()).or_default();

        if observed.contains_key("") || stored.contains_key("") {
            // an opaque value can't be merged per range
            *stored = observed;
        } else {
            for (range, token) in observed {
                let merged = match stored.get(&range) {
                    Some(existing) => existing.merge(&token),
                    None => token,
                };
                stored.insert(range, merged);
            }
        }
        debug!(
            host = %scope.host,
            collection = %scope.collection,
            ranges = stored.len(),
            "merged session token"
        );
    }

    /// Stored tokens for `scope`, rendered as a header value.
    pub fn get(&self, scope: &SessionScope) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(scope)
            .filter(|ranges| !ranges.is_empty())
            .map(format_session_header)
    }

    /// Drop tokens for `link` and everything below it on `host`.
    pub fn clear(&self, host: &str, link: &str) {
        let prefix = format!("{}/", link);
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|scope, _| {
            scope.host != host || (scope.collection != link && !scope.collection.starts_with(&prefix))
        });
    }

    /// Attach the stored session token to `request` if session consistency applies.
    ///
    /// A token the caller set explicitly is never replaced.
    pub fn apply_session_token(
        &self,
        host: &str,
        request: &mut ServiceRequest,
        default_consistency: Option<ConsistencyLevel>,
    ) {
        if request.headers().contains_key(headers::SESSION_TOKEN) {
            return;
        }

        let effective = match request.header_str(headers::CONSISTENCY_LEVEL) {
            Some(level) => level.parse::<ConsistencyLevel>().ok(),
            None => default_consistency,
        };
        if effective != Some(ConsistencyLevel::Session) {
            return;
        }

        let Some(scope) = SessionScope::for_request(host, request) else {
            return;
        };
        let Some(token) = self.get(&scope) else {
            return;
        };

        match HeaderValue::from_str(&token) {
            Ok(value) => {
                request.headers_mut().insert(headers::SESSION_TOKEN, value);
            }
            Err(_) => warn!(collection = %scope.collection, "stored session token is not a valid header"),
        }
    }

    /// Record the session token a response carried for `request`.
    pub fn capture_session_token(&self, host: &str, request: &ServiceRequest, response_headers: &HeaderMap) {
        if request.is_collection_delete() {
            return;
        }
        let Some(token) = response_headers
            .get(headers::SESSION_TOKEN)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if let Some(scope) = SessionScope::for_request(host, request) {
            self.merge(&scope, token);
        }
    }

    /// Forget tokens after `request` deleted a collection or database.
    pub fn clear_token(&self, host: &str, request: &ServiceRequest) {
        let link = request.address().path();
        if !link.is_empty() {
            debug!(host, link, "clearing session tokens");
            self.clear(host, link);
        }
    }
}
