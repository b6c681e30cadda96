//! Request authorization.
//!
//! Master-key requests are signed with HMAC-SHA256 over
//! `verb\nresourceType\nresourceLink\ndate\n\n` (verb, type and date lowercased),
//! using the base64-decoded account key. Resource tokens are sent as issued.

use crate::constants::headers as header_names;
use crate::error::{Error, Result};
use crate::request::ResourceType;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, Method};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use sha2::Sha256;
use std::fmt;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Credential used to authorize requests.
#[derive(Clone)]
pub enum AuthorizationKey {
    /// Base64-encoded account master key
    Master(SecretString),
    /// Pre-issued resource token
    ResourceToken(SecretString),
}

impl AuthorizationKey {
    pub fn master(key: impl Into<String>) -> Self {
        Self::Master(SecretString::from(key.into()))
    }

    pub fn resource_token(token: impl Into<String>) -> Self {
        Self::ResourceToken(SecretString::from(token.into()))
    }
}

impl fmt::Debug for AuthorizationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master(_) => f.write_str("AuthorizationKey::Master([REDACTED])"),
            Self::ResourceToken(_) => f.write_str("AuthorizationKey::ResourceToken([REDACTED])"),
        }
    }
}

enum Credential {
    Master(SecretBox<Vec<u8>>),
    ResourceToken(SecretString),
}

/// Produces `authorization` header values.
pub struct RequestSigner {
    credential: Credential,
}

impl RequestSigner {
    /// Prepare a signer, decoding the master key up front.
    pub fn new(key: &AuthorizationKey) -> Result<Self> {
        let credential = match key {
            AuthorizationKey::Master(secret) => {
                let decoded = STANDARD
                    .decode(secret.expose_secret().trim())
                    .map_err(|e| Error::Configuration(format!("master key is not valid base64: {}", e)))?;
                if decoded.is_empty() {
                    return Err(Error::Configuration("master key is empty".into()));
                }
                Credential::Master(SecretBox::new(Box::new(decoded)))
            }
            AuthorizationKey::ResourceToken(token) => Credential::ResourceToken(token.clone()),
        };
        Ok(Self { credential })
    }

    /// Authorization header value for one request.
    pub fn authorization(
        &self,
        method: &Method,
        resource_type: ResourceType,
        resource_link: &str,
        date: &str,
    ) -> Result<String> {
        match &self.credential {
            Credential::Master(key) => {
                let payload = format!(
                    "{}\n{}\n{}\n{}\n\n",
                    method.as_str().to_lowercase(),
                    resource_type.path_segment().to_lowercase(),
                    resource_link,
                    date.to_lowercase()
                );
                let mut mac = HmacSha256::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::Configuration(format!("unusable master key: {}", e)))?;
                mac.update(payload.as_bytes());
                let signature = STANDARD.encode(mac.finalize().into_bytes());

                let token = format!("type=master&ver=1.0&sig={}", signature);
                Ok(form_urlencoded::byte_serialize(token.as_bytes()).collect())
            }
            Credential::ResourceToken(token) => Ok(token.expose_secret().to_string()),
        }
    }

    /// Set `x-ms-date` and `authorization` for a request signed at `at`.
    pub fn sign_headers(
        &self,
        headers: &mut HeaderMap,
        method: &Method,
        resource_type: ResourceType,
        resource_link: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let date = format_date(at);
        let authorization = self.authorization(method, resource_type, resource_link, &date)?;
        headers.insert(header_names::DATE, header_value(date)?);
        headers.insert(AUTHORIZATION, header_value(authorization)?);
        Ok(())
    }
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(|_| Error::Configuration("credential produced an invalid header".into()))
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.credential {
            Credential::Master(_) => "master",
            Credential::ResourceToken(_) => "resource_token",
        };
        f.debug_struct("RequestSigner").field("credential", &kind).finish()
    }
}

/// `x-ms-date` value for `at`, in RFC 1123 format.
pub fn format_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    const KEY: &str = "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

    fn decode(header: &str) -> String {
        form_urlencoded::parse(format!("v={}", header).as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_format_date() {
        let at = Utc.with_ymd_and_hms(2017, 4, 27, 0, 51, 12).unwrap();
        assert_eq!(format_date(at), "Thu, 27 Apr 2017 00:51:12 GMT");
    }

    #[test]
    fn test_master_signature_matches_payload() {
        let signer = RequestSigner::new(&AuthorizationKey::master(KEY)).unwrap();
        let date = "Thu, 27 Apr 2017 00:51:12 GMT";
        let header = signer
            .authorization(&Method::GET, ResourceType::Collection, "dbs/ToDoList", date)
            .unwrap();

        let mut mac = HmacSha256::new_from_slice(&STANDARD.decode(KEY).unwrap()).unwrap();
        mac.update(b"get\ncolls\ndbs/ToDoList\nthu, 27 apr 2017 00:51:12 gmt\n\n");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(decode(&header), format!("type=master&ver=1.0&sig={}", expected));
        assert!(!header.contains('&'));
    }

    #[test]
    fn test_signature_depends_on_verb_and_link() {
        let signer = RequestSigner::new(&AuthorizationKey::master(KEY)).unwrap();
        let date = "Mon, 01 Jan 2024 00:00:00 GMT";
        let get = signer
            .authorization(&Method::GET, ResourceType::Document, "dbs/d/colls/c/docs/x", date)
            .unwrap();
        let delete = signer
            .authorization(&Method::DELETE, ResourceType::Document, "dbs/d/colls/c/docs/x", date)
            .unwrap();
        let other = signer
            .authorization(&Method::GET, ResourceType::Document, "dbs/d/colls/c/docs/y", date)
            .unwrap();
        assert_ne!(get, delete);
        assert_ne!(get, other);
    }

    #[test]
    fn test_sign_headers_sets_date_and_authorization() {
        let signer = RequestSigner::new(&AuthorizationKey::master(KEY)).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut headers = HeaderMap::new();
        signer
            .sign_headers(&mut headers, &Method::POST, ResourceType::Document, "dbs/d/colls/c", at)
            .unwrap();

        assert_eq!(headers.get(header_names::DATE).unwrap(), "Fri, 01 Mar 2024 08:00:00 GMT");
        let expected = signer
            .authorization(&Method::POST, ResourceType::Document, "dbs/d/colls/c", "Fri, 01 Mar 2024 08:00:00 GMT")
            .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap().to_str().unwrap(), expected);
    }

    #[test]
    fn test_resource_token_is_passed_through() {
        let signer =
            RequestSigner::new(&AuthorizationKey::resource_token("type=resource&ver=1.0&sig=abc")).unwrap();
        let header = signer
            .authorization(&Method::GET, ResourceType::Document, "dbs/d", "date")
            .unwrap();
        assert_eq!(header, "type=resource&ver=1.0&sig=abc");
    }

    #[test]
    fn test_invalid_master_key() {
        assert_matches!(
            RequestSigner::new(&AuthorizationKey::master("not base64!")),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            RequestSigner::new(&AuthorizationKey::master("")),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_debug_redacts() {
        let key = AuthorizationKey::master(KEY);
        assert!(!format!("{:?}", key).contains("C2y6"));
    }
}
