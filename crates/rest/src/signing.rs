//! Request signing and addressing
//!
//! Requests are signed with HMAC-SHA1 over a canonical string built from the
//! method, selected headers and the resource path. The same canonical form,
//! with an expiry time in place of the date, signs query-string URLs that can
//! be handed to clients without credentials.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use jiff::Timestamp;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, DATE, HeaderMap, HeaderValue};
use sha1::Sha1;
use stowage_core::{Credentials, Error, Result};
use url::Url;

use crate::executor::RestRequest;
use crate::provider::Provider;

type HmacSha1 = Hmac<Sha1>;

/// URL-encode a string, writing spaces as `%20` and keeping `@`
pub fn encode_url_string(value: &str) -> String {
    urlencoding::encode(value).replace("%40", "@")
}

/// URL-encode an object key, keeping `/` separators
pub fn encode_url_path(key: &str) -> String {
    key.split('/')
        .map(encode_url_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the string to sign for a request
///
/// `resource` is the bucket-qualified path, optionally followed by its query
/// string. Only query parameters that identify a subresource are signed.
pub fn canonical_string(
    method: &str,
    resource: &str,
    headers: &HeaderMap,
    expires: Option<&str>,
    provider: Provider,
) -> String {
    let prefix = provider.header_prefix();
    let mut interesting: BTreeMap<String, String> = BTreeMap::new();

    for (name, value) in headers {
        let key = name.as_str().to_ascii_lowercase();
        if matches!(key.as_str(), "content-type" | "content-md5" | "date") || key.starts_with(prefix)
        {
            let value = String::from_utf8_lossy(value.as_bytes()).trim().to_string();
            interesting
                .entry(key)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
    }

    if interesting.contains_key(provider.alternate_date_header()) {
        interesting.insert("date".to_string(), String::new());
    }
    if let Some(expires) = expires {
        interesting.insert("date".to_string(), expires.to_string());
    }
    interesting.entry("content-type".to_string()).or_default();
    interesting.entry("content-md5".to_string()).or_default();

    let mut buf = String::new();
    buf.push_str(method);
    buf.push('\n');

    for (key, value) in &interesting {
        if key.starts_with(prefix) {
            buf.push_str(key);
            buf.push(':');
        }
        buf.push_str(value);
        buf.push('\n');
    }

    let (path, query) = match resource.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (resource, None),
    };
    buf.push_str(path);

    if let Some(query) = query {
        let mut params: BTreeMap<String, Option<String>> = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = match pair.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (pair, None),
            };
            let name = decode(name);
            if provider.is_resource_parameter(&name) {
                params.insert(name, value.map(decode));
            }
        }
        if !params.is_empty() {
            let rendered: Vec<String> = params
                .into_iter()
                .map(|(name, value)| match value {
                    Some(v) => format!("{name}={v}"),
                    None => name,
                })
                .collect();
            buf.push('?');
            buf.push_str(&rendered.join("&"));
        }
    }

    buf
}

fn decode(value: &str) -> String {
    let value = value.replace('+', " ");
    urlencoding::decode(&value)
        .map(|v| v.into_owned())
        .unwrap_or(value)
}

/// Base64 HMAC-SHA1 signature of `canonical` under `secret`
pub fn sign_hmac_sha1(secret: &str, canonical: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Auth(format!("Invalid secret key: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Format a timestamp as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(timestamp: Timestamp) -> String {
    timestamp.strftime("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date header
pub fn parse_http_date(value: &str) -> Option<Timestamp> {
    jiff::fmt::rfc2822::DateTimeParser::new()
        .parse_timestamp(value.trim())
        .ok()
}

/// Whether a bucket name can be used as a DNS label prefix
pub fn is_dns_bucket_name(name: &str) -> bool {
    if name.len() < 3 || name.len() > 63 {
        return false;
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !first_ok
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return false;
    }

    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return false;
    }

    name.split('.')
        .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}

/// Host to address a bucket at
pub fn hostname_for_bucket(bucket: &str, endpoint: &str, disable_dns_buckets: bool) -> String {
    if !disable_dns_buckets && is_dns_bucket_name(bucket) {
        format!("{bucket}.{endpoint}")
    } else {
        endpoint.to_string()
    }
}

/// Bucket named by a request host, if the host is not the endpoint itself
///
/// `bucket.endpoint` yields `bucket`; any other host is taken to be a CNAME
/// for a bucket of the same name.
pub fn bucket_from_hostname(host: &str, endpoint: &str) -> Option<String> {
    if host.eq_ignore_ascii_case(endpoint) {
        return None;
    }
    let suffix = format!(".{endpoint}");
    if host.len() > suffix.len() && host.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase())
    {
        return Some(host[..host.len() - suffix.len()].to_string());
    }
    Some(host.to_string())
}

/// How buckets are placed in request URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketLookup {
    /// Subdomain when the bucket name and endpoint allow it
    Auto,
    /// Always `/bucket/key`
    Path,
    /// Subdomain whenever the bucket name allows it
    Dns,
}

impl BucketLookup {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BucketLookup::Auto),
            "path" => Ok(BucketLookup::Path),
            "dns" | "virtual" => Ok(BucketLookup::Dns),
            other => Err(Error::Config(format!(
                "Unknown bucket lookup '{other}'. Expected 'auto', 'path' or 'dns'"
            ))),
        }
    }
}

/// Service endpoint and bucket addressing rules
#[derive(Debug, Clone)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
    lookup: BucketLookup,
}

impl Endpoint {
    /// Parse an endpoint as written in an alias
    ///
    /// A missing scheme means https unless `https_only` is off. An empty
    /// endpoint selects the provider default.
    pub fn parse(
        endpoint: &str,
        provider: Provider,
        bucket_lookup: &str,
        https_only: bool,
        disable_dns_buckets: bool,
    ) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        let endpoint = if endpoint.is_empty() {
            provider.default_endpoint()
        } else {
            endpoint
        };
        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else if https_only {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        };

        let url = Url::parse(&with_scheme)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("Endpoint '{endpoint}' has no host")))?
            .to_string();

        let lookup = if disable_dns_buckets {
            BucketLookup::Path
        } else {
            BucketLookup::parse(bucket_lookup)?
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port: url.port(),
            lookup,
        })
    }

    /// Endpoint host without any port
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether requests use https
    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    fn host_allows_subdomains(&self) -> bool {
        self.host != "localhost" && self.host.parse::<std::net::IpAddr>().is_err()
    }

    /// Whether a bucket is addressed as a subdomain
    pub fn uses_virtual_host(&self, bucket: &str) -> bool {
        match self.lookup {
            BucketLookup::Path => false,
            BucketLookup::Dns => is_dns_bucket_name(bucket),
            BucketLookup::Auto => self.host_allows_subdomains() && is_dns_bucket_name(bucket),
        }
    }

    /// Build a request URL
    ///
    /// Query parameters are `(name, value)` pairs; a `None` value renders
    /// as a bare name such as `?acl`.
    pub fn url(
        &self,
        bucket: Option<&str>,
        key: Option<&str>,
        query: &[(&str, Option<String>)],
    ) -> Result<Url> {
        let (host, mut path) = match bucket {
            Some(bucket) if self.uses_virtual_host(bucket) => {
                (hostname_for_bucket(bucket, &self.host, false), "/".to_string())
            }
            Some(bucket) => (self.host.clone(), format!("/{}/", encode_url_string(bucket))),
            None => (self.host.clone(), "/".to_string()),
        };
        if bucket.is_some() && key.is_none() && path.len() > 1 {
            path.pop();
        }
        if let Some(key) = key {
            path.push_str(&encode_url_path(key));
        }

        let mut url = format!("{}://{}", self.scheme, host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{port}"));
        }
        url.push_str(&path);

        if !query.is_empty() {
            let rendered: Vec<String> = query
                .iter()
                .map(|(name, value)| match value {
                    Some(v) => format!("{}={}", encode_url_string(name), encode_url_string(v)),
                    None => encode_url_string(name),
                })
                .collect();
            url.push('?');
            url.push_str(&rendered.join("&"));
        }

        Ok(Url::parse(&url)?)
    }
}

/// Signs requests for one alias
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Option<Credentials>,
    provider: Provider,
    endpoint: Endpoint,
}

impl Signer {
    /// Create a signer; `None` credentials sign nothing
    pub fn new(credentials: Option<Credentials>, provider: Provider, endpoint: Endpoint) -> Self {
        Self {
            credentials,
            provider,
            endpoint,
        }
    }

    /// Service dialect
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Endpoint requests are addressed to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether requests go out unsigned
    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_none()
    }

    /// Canonical resource for a request URL
    fn resource_for(&self, url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        let mut resource = match bucket_from_hostname(host, self.endpoint.host()) {
            Some(bucket) if !bucket.is_empty() => format!("/{}{}", bucket, url.path()),
            _ => url.path().to_string(),
        };
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }
        resource
    }

    /// Set the `Date` and `Authorization` headers for the request
    pub fn authorize(&self, request: &mut RestRequest, now: Timestamp) -> Result<()> {
        let Some(credentials) = &self.credentials else {
            tracing::debug!("Service is anonymous, request will not be signed");
            return Ok(());
        };

        request.headers.insert(DATE, header_value(&http_date(now))?);

        let resource = self.resource_for(&request.url);
        let canonical = canonical_string(
            request.method.as_str(),
            &resource,
            &request.headers,
            None,
            self.provider,
        );
        tracing::debug!(canonical = %canonical.replace('\n', "|"), "Signing request");

        let signature = sign_hmac_sha1(&credentials.secret_key, &canonical)?;
        let authorization = format!(
            "{} {}:{}",
            self.provider.signature_identifier(),
            credentials.access_key,
            signature
        );
        request
            .headers
            .insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }

    /// Build a query-string signed URL valid until `expires`
    ///
    /// `special_param` names a subresource such as `acl` or `torrent`.
    pub fn presign(
        &self,
        method: &Method,
        bucket: &str,
        key: Option<&str>,
        special_param: Option<&str>,
        expires: Timestamp,
    ) -> Result<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            Error::Auth("Signed URLs require credentials; this alias is anonymous".into())
        })?;

        let expires_secs = expires.as_second().to_string();
        let mut resource = format!("/{}/", bucket);
        if let Some(key) = key {
            resource.push_str(&encode_url_path(key));
        }
        if let Some(param) = special_param {
            resource.push('?');
            resource.push_str(param);
        }

        let canonical = canonical_string(
            method.as_str(),
            &resource,
            &HeaderMap::new(),
            Some(&expires_secs),
            self.provider,
        );
        tracing::debug!(canonical = %canonical.replace('\n', "|"), "Signing URL");
        let signature = sign_hmac_sha1(&credentials.secret_key, &canonical)?;

        let mut query: Vec<(&str, Option<String>)> = Vec::new();
        if let Some(param) = special_param {
            query.push((param, None));
        }
        query.push(("AWSAccessKeyId", Some(credentials.access_key.clone())));
        query.push(("Expires", Some(expires_secs)));
        query.push(("Signature", Some(signature)));

        Ok(self.endpoint.url(Some(bucket), key, &query)?.to_string())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidRequest(format!("Invalid header value '{value}': {e}")))
}
