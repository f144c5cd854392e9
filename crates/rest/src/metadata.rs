//! Object metadata carried in HTTP headers

use std::collections::BTreeMap;

use jiff::Timestamp;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use stowage_core::{Error, Result};

use crate::provider::Provider;
use crate::signing::parse_http_date;

/// Standard HTTP headers stored as object metadata
pub const HTTP_METADATA_NAMES: &[&str] = &[
    "content-type",
    "content-md5",
    "content-length",
    "content-language",
    "expires",
    "cache-control",
    "content-disposition",
    "content-encoding",
];

/// Response headers kept alongside metadata
const RESPONSE_HEADERS_KEPT: &[&str] = &["etag", "date", "last-modified", "content-range"];

/// Header name for a metadata key
///
/// Standard HTTP metadata and names already carrying the service prefix are
/// used as they are; everything else is user metadata.
pub fn metadata_header_name(key: &str, provider: Provider) -> String {
    let lower = key.to_ascii_lowercase();
    if HTTP_METADATA_NAMES.contains(&lower.as_str()) || lower.starts_with(provider.header_prefix()) {
        key.to_string()
    } else {
        format!("{}{key}", provider.metadata_prefix())
    }
}

/// Add metadata entries to request headers
///
/// Names must be ASCII and values must not contain line breaks. Two names
/// that differ only by case are accepted when their values agree.
pub fn add_metadata_headers<I, K, V>(headers: &mut HeaderMap, metadata: I, provider: Provider) -> Result<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut seen: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in metadata {
        let name = metadata_header_name(key.as_ref(), provider);
        let value = value.as_ref();

        if !name.is_ascii() {
            return Err(Error::InvalidRequest(format!(
                "User metadata name is incompatible with the REST interface, only ASCII characters are allowed in HTTP headers: {name}"
            )));
        }
        if value.contains(['\r', '\n']) {
            return Err(Error::InvalidRequest(format!(
                "The value of metadata item {name} cannot be represented as an HTTP header: {value}"
            )));
        }

        let lower = name.to_ascii_lowercase();
        if let Some(previous) = seen.get(&lower)
            && previous != value
        {
            return Err(Error::InvalidRequest(format!(
                "HTTP header name occurs multiple times in request with different values, probably due to mismatched capitalization when setting metadata names. Duplicate metadata name: '{name}'"
            )));
        }

        let header_name = HeaderName::from_bytes(lower.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("Invalid metadata name '{name}': {e}")))?;
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("Invalid value for metadata '{name}': {e}")))?;
        headers.insert(header_name, header_value);
        seen.insert(lower, value.to_string());
    }
    Ok(())
}

/// Metadata recovered from response headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// User metadata with the metadata prefix removed
    pub user: BTreeMap<String, String>,
    /// Other service headers with the service prefix removed
    pub service: BTreeMap<String, String>,
    /// Standard HTTP metadata and kept response headers, ETag unquoted
    pub http: BTreeMap<String, String>,
}

impl ResponseMetadata {
    pub fn etag(&self) -> Option<&str> {
        self.http.get("etag").map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.http.get("content-type").map(String::as_str)
    }

    pub fn content_length(&self) -> Option<i64> {
        self.http.get("content-length").and_then(|v| v.parse().ok())
    }

    pub fn last_modified(&self) -> Option<Timestamp> {
        self.http.get("last-modified").and_then(|v| parse_http_date(v))
    }

    pub fn storage_class(&self) -> Option<&str> {
        self.service.get("storage-class").map(String::as_str)
    }

    pub fn version_id(&self) -> Option<&str> {
        self.service.get("version-id").map(String::as_str)
    }
}

/// Split response headers into user, service and HTTP metadata
pub fn clean_response_metadata(headers: &HeaderMap, provider: Provider) -> ResponseMetadata {
    let mut metadata = ResponseMetadata::default();

    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        let value = values.join(",");
        let key = name.as_str();

        if let Some(user_key) = key.strip_prefix(provider.metadata_prefix()) {
            metadata.user.insert(user_key.to_string(), value);
        } else if let Some(service_key) = key.strip_prefix(provider.header_prefix()) {
            metadata.service.insert(service_key.to_string(), value);
        } else if HTTP_METADATA_NAMES.contains(&key) || RESPONSE_HEADERS_KEPT.contains(&key) {
            let value = if key == "etag" {
                unquote_etag(&value).to_string()
            } else {
                value
            };
            metadata.http.insert(key.to_string(), value);
        } else {
            tracing::trace!(header = key, "Ignoring response header");
        }
    }
    metadata
}

/// Strip surrounding quotes from an ETag
pub fn unquote_etag(etag: &str) -> &str {
    let etag = etag.trim();
    etag.strip_prefix('"')
        .and_then(|e| e.strip_suffix('"'))
        .unwrap_or(etag)
}

/// Whether an ETag is a plain MD5 of the object content
///
/// Multipart and encrypted uploads get ETags that are not.
pub fn is_etag_md5(etag: &str) -> bool {
    let etag = unquote_etag(etag);
    etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare a locally computed MD5 with the ETag the service returned
pub fn verify_etag(expected_hex: &str, etag: Option<&str>, key: &str, provider: Provider) -> Result<()> {
    let actual = etag.map(unquote_etag).unwrap_or_default();
    if !expected_hex.eq_ignore_ascii_case(actual) {
        let service = match provider {
            Provider::S3 => "S3",
            Provider::GoogleStorage => "Google Storage",
        };
        return Err(Error::Integrity(format!(
            "Mismatch between MD5 hash of uploaded data ({expected_hex}) and ETag returned by {service} ({actual}) for object key: {key}"
        )));
    }
    tracing::debug!(key, "Upload verified, MD5 hash matched the returned ETag");
    Ok(())
}
