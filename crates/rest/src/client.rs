//! Storage client
//!
//! Implements the `ObjectStore` trait from stowage-core on top of the
//! signed REST executor.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use reqwest::Method;
use reqwest::header::{
    CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, IF_MATCH,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, RANGE,
};
use stowage_core::{
    Alias, BucketStatus, CannedAcl, Error, GetOptions, HttpSettings, ListOptions, ListResult,
    ObjectData, ObjectInfo, ObjectSource, ObjectStore, PutOptions, RemotePath, Result,
    ServiceError,
};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::body::RepeatableBody;
use crate::executor::{RestExecutor, RestRequest, RestResponse};
use crate::metadata::{add_metadata_headers, clean_response_metadata, is_etag_md5, unquote_etag, verify_etag};
use crate::provider::Provider;
use crate::signing::{Endpoint, Signer, encode_url_path, http_date};
use crate::throttle;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::xml::{
    CopyObjectResult, CreateBucketConfiguration, ListAllMyBucketsResult, ListBucketResult,
    LocationConstraint, from_xml, is_error_document, to_xml,
};

/// Content type used when none is given
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

pub(crate) type Query = Vec<(&'static str, Option<String>)>;

/// Client for one configured alias
pub struct StorageClient {
    executor: RestExecutor,
    alias: Alias,
}

impl StorageClient {
    /// Create a client from an alias, with alias settings layered over `global`
    pub fn new(alias: Alias, global: &HttpSettings) -> Result<Self> {
        let settings = alias.http_settings(global);
        let transport = ReqwestTransport::new(&settings, alias.insecure)?;
        Self::with_transport(alias, global, Arc::new(transport))
    }

    /// Create a client that sends requests through `transport`
    pub fn with_transport(
        alias: Alias,
        global: &HttpSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let settings = alias.http_settings(global);
        let provider: Provider = alias.provider.parse()?;
        let endpoint = Endpoint::parse(
            &alias.endpoint,
            provider,
            &alias.bucket_lookup,
            settings.https_only,
            settings.disable_dns_buckets,
        )?;
        let signer = Signer::new(alias.credentials(), provider, endpoint);

        tracing::debug!(
            alias = %alias.name,
            provider = %provider,
            anonymous = signer.is_anonymous(),
            "Created storage client"
        );

        Ok(Self {
            executor: RestExecutor::new(transport, signer, settings),
            alias,
        })
    }

    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    pub fn provider(&self) -> Provider {
        self.executor.signer().provider()
    }

    pub fn settings(&self) -> &HttpSettings {
        self.executor.settings()
    }

    pub(crate) fn url(&self, bucket: Option<&str>, key: Option<&str>, query: &[(&str, Option<String>)]) -> Result<Url> {
        self.executor.signer().endpoint().url(bucket, key, query)
    }

    pub(crate) fn request(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query: &[(&str, Option<String>)],
    ) -> Result<RestRequest> {
        let url = self.url(bucket, key.filter(|k| !k.is_empty()), query)?;
        Ok(RestRequest::new(method, url))
    }

    pub(crate) async fn perform(&self, mut request: RestRequest, expected: &[u16]) -> Result<RestResponse> {
        if request.body.is_none() && matches!(request.method, Method::PUT | Method::POST) {
            request.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        self.executor.perform(request, expected).await
    }

    /// Read a response body expected to hold a result document
    ///
    /// Some operations answer 200 and report failure in the body.
    pub(crate) async fn result_document(&self, response: RestResponse, operation: &str) -> Result<String> {
        let text = response.body.text().await?;
        if is_error_document(&text) {
            tracing::warn!(operation, "Service reported an error in a successful response");
            let mut error = ServiceError::from_xml(format!("{operation} failed."), text);
            error.status_code = Some(response.status);
            return Err(error.into());
        }
        Ok(text)
    }

    /// Wrap an upload source in a replayable, throttled body
    ///
    /// Streams of unknown length are read into memory first: signed uploads
    /// need a Content-Length, and the buffered copy can be replayed and
    /// checked against the returned ETag.
    pub(crate) async fn upload_body(&self, source: ObjectSource, options: &PutOptions) -> Result<RepeatableBody> {
        let source = match source {
            ObjectSource::Reader { mut reader, length: None } => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                tracing::debug!(bytes = data.len(), "Buffered upload stream of unknown length");
                ObjectSource::Bytes(data)
            }
            other => other,
        };
        let body = RepeatableBody::from_object_source(source, self.settings().stream_retry_buffer_size).await?;
        Ok(body
            .with_throttle(throttle::global())
            .with_progress(options.progress.clone()))
    }

    /// Headers shared by single and multipart uploads
    pub(crate) fn upload_headers(&self, headers: &mut HeaderMap, options: &PutOptions) -> Result<()> {
        let provider = self.provider();
        let content_type = options.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        headers.insert(CONTENT_TYPE, header_value(content_type)?);

        if let Some(acl) = options.acl {
            headers.insert(header_name(&provider.acl_header())?, HeaderValue::from_static(acl.header_value()));
        }
        let storage_class = options
            .storage_class
            .as_deref()
            .or(self.settings().default_storage_class.as_deref());
        if let Some(class) = storage_class {
            headers.insert(header_name(&provider.storage_class_header())?, header_value(class)?);
        }
        add_metadata_headers(headers, &options.metadata, provider)
    }

    fn object_info(&self, key: &str, headers: &HeaderMap) -> ObjectInfo {
        let metadata = clean_response_metadata(headers, self.provider());
        let mut info = match metadata.content_length() {
            Some(len) => ObjectInfo::file(key, len),
            None => ObjectInfo {
                key: key.to_string(),
                ..ObjectInfo::default()
            },
        };
        info.etag = metadata.etag().map(str::to_string);
        info.content_type = metadata.content_type().map(str::to_string);
        info.last_modified = metadata.last_modified();
        info.storage_class = metadata.storage_class().map(str::to_string);
        info.version_id = metadata.version_id().map(str::to_string);
        info.metadata = metadata.user;
        info
    }

    /// Signed URL granting GET access until `expires`
    pub fn presign_get(&self, path: &RemotePath, expires: Timestamp) -> Result<String> {
        self.executor
            .signer()
            .presign(&Method::GET, &path.bucket, Some(&path.key), None, expires)
    }

    /// Signed URL granting PUT access until `expires`
    pub fn presign_put(&self, path: &RemotePath, expires: Timestamp) -> Result<String> {
        self.executor
            .signer()
            .presign(&Method::PUT, &path.bucket, Some(&path.key), None, expires)
    }

    /// Apply a canned ACL to an object
    pub async fn put_object_acl(&self, path: &RemotePath, acl: CannedAcl) -> Result<()> {
        let mut request = self.request(Method::PUT, Some(&path.bucket), Some(&path.key), &[("acl", None)])?;
        request.headers.insert(
            header_name(&self.provider().acl_header())?,
            HeaderValue::from_static(acl.header_value()),
        );
        self.perform(request, &[200]).await?;
        tracing::debug!(path = %path, acl = %acl, "Applied object ACL");
        Ok(())
    }

    /// Apply a canned ACL to a bucket
    pub async fn put_bucket_acl(&self, bucket: &str, acl: CannedAcl) -> Result<()> {
        let mut request = self.request(Method::PUT, Some(bucket), None, &[("acl", None)])?;
        request.headers.insert(
            header_name(&self.provider().acl_header())?,
            HeaderValue::from_static(acl.header_value()),
        );
        self.perform(request, &[200]).await?;
        tracing::debug!(bucket, acl = %acl, "Applied bucket ACL");
        Ok(())
    }

    /// Region a bucket lives in; `None` for the default region
    pub async fn bucket_location(&self, bucket: &str) -> Result<Option<String>> {
        let request = self.request(Method::GET, Some(bucket), None, &[("location", None)])?;
        let response = self.perform(request, &[200]).await?;
        let text = response.body.text().await?;
        let location: LocationConstraint = from_xml(&text)?;
        Ok(location.location.filter(|l| !l.trim().is_empty()))
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn list_buckets(&self) -> Result<Vec<ObjectInfo>> {
        let request = self.request(Method::GET, None, None, &[])?;
        let response = self.perform(request, &[200]).await?;
        let text = response.body.text().await?;
        let result: ListAllMyBucketsResult = from_xml(&text)?;

        let buckets = result
            .buckets
            .bucket
            .into_iter()
            .map(|b| {
                let mut info = ObjectInfo::bucket(b.name);
                info.last_modified = b.creation_date.and_then(|d| d.parse::<Timestamp>().ok());
                info
            })
            .collect();
        Ok(buckets)
    }

    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        let prefix = match (&options.prefix, path.key.is_empty()) {
            (Some(p), true) => Some(p.clone()),
            (Some(p), false) => Some(format!("{}{}", path.key, p)),
            (None, false) => Some(path.key.clone()),
            (None, true) => None,
        };

        let mut query: Query = Vec::new();
        if let Some(p) = &prefix {
            query.push(("prefix", Some(p.clone())));
        }
        if !options.recursive {
            let delimiter = options.delimiter.clone().unwrap_or_else(|| "/".to_string());
            query.push(("delimiter", Some(delimiter)));
        }
        if let Some(marker) = &options.marker {
            query.push(("marker", Some(marker.clone())));
        }
        if let Some(max) = options.max_keys {
            query.push(("max-keys", Some(max.to_string())));
        }

        let request = self.request(Method::GET, Some(&path.bucket), None, &query)?;
        let response = self.perform(request, &[200]).await?;
        let text = response.body.text().await?;
        let result: ListBucketResult = from_xml(&text)?;

        let mut items = Vec::new();
        for prefix in &result.common_prefixes {
            items.push(ObjectInfo::dir(&prefix.prefix));
        }
        for object in &result.contents {
            let mut info = ObjectInfo::file(&object.key, object.size);
            info.last_modified = object
                .last_modified
                .as_deref()
                .and_then(|d| d.parse::<Timestamp>().ok());
            info.etag = object.etag.as_deref().map(|e| unquote_etag(e).to_string());
            info.storage_class = object.storage_class.clone();
            items.push(info);
        }

        // Without a delimiter the service omits NextMarker; the last key
        // continues the listing
        let next_marker = if result.is_truncated {
            result
                .next_marker
                .clone()
                .or_else(|| result.contents.last().map(|o| o.key.clone()))
        } else {
            None
        };

        Ok(ListResult {
            items,
            truncated: result.is_truncated,
            next_marker,
        })
    }

    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus> {
        let request = self.request(Method::GET, Some(bucket), None, &[("max-keys", Some("0".into()))])?;
        match self.perform(request, &[200]).await {
            Ok(_) => Ok(BucketStatus::Mine),
            Err(e) => match e.status_code() {
                Some(404) => Ok(BucketStatus::DoesNotExist),
                Some(403) => Ok(BucketStatus::AlreadyClaimed),
                _ => Err(e),
            },
        }
    }

    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()> {
        let mut request = self.request(Method::PUT, Some(bucket), None, &[])?;
        if let Some(location) = location.filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("US")) {
            let xml = to_xml(&CreateBucketConfiguration::new(location))?;
            request = request.with_body(RepeatableBody::from_bytes(xml.into_bytes()));
        }
        self.perform(request, &[200]).await?;
        tracing::info!(bucket, location = ?location, "Created bucket");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let request = self.request(Method::DELETE, Some(bucket), None, &[])?;
        self.perform(request, &[204]).await?;
        tracing::info!(bucket, "Deleted bucket");
        Ok(())
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        let request = self.request(Method::HEAD, Some(&path.bucket), Some(&path.key), &[])?;
        let response = self.perform(request, &[200]).await?;
        Ok(self.object_info(&path.key, &response.headers))
    }

    async fn get_object(&self, path: &RemotePath, options: GetOptions) -> Result<ObjectData> {
        let mut query: Query = Vec::new();
        if let Some(version) = &options.version_id {
            query.push(("versionId", Some(version.clone())));
        }
        let mut request = self.request(Method::GET, Some(&path.bucket), Some(&path.key), &query)?;

        if let Some(range) = options.range_header() {
            request.headers.insert(RANGE, header_value(&range)?);
        }
        if let Some(since) = options.if_modified_since {
            request.headers.insert(IF_MODIFIED_SINCE, header_value(&http_date(since))?);
        }
        if let Some(since) = options.if_unmodified_since {
            request.headers.insert(IF_UNMODIFIED_SINCE, header_value(&http_date(since))?);
        }
        if !options.if_match.is_empty() {
            request.headers.insert(IF_MATCH, header_value(&options.if_match.join(","))?);
        }
        if !options.if_none_match.is_empty() {
            request
                .headers
                .insert(IF_NONE_MATCH, header_value(&options.if_none_match.join(","))?);
        }

        let response = self.perform(request, &[200, 206]).await?;
        let info = self.object_info(&path.key, &response.headers);
        Ok(ObjectData {
            info,
            reader: Box::new(response.body),
        })
    }

    async fn put_object(&self, path: &RemotePath, source: ObjectSource, options: PutOptions) -> Result<ObjectInfo> {
        let body = self.upload_body(source, &options).await?;
        let mut request = self
            .request(Method::PUT, Some(&path.bucket), Some(&path.key), &[])?
            .with_body(body.clone());
        self.upload_headers(&mut request.headers, &options)?;
        if let Some(md5) = &options.content_md5 {
            request.headers.insert(CONTENT_MD5, header_value(md5)?);
        }

        let response = self.perform(request, &[200]).await?;
        let etag = response.header("etag").map(|e| unquote_etag(&e).to_string());

        if options.content_md5.is_none() && body.content_length().is_some() {
            match (body.md5_hex(), etag.as_deref()) {
                (Some(expected), Some(etag)) if is_etag_md5(etag) => {
                    verify_etag(&expected, Some(etag), &path.key, self.provider())?;
                }
                (Some(expected), None) => {
                    verify_etag(&expected, None, &path.key, self.provider())?;
                }
                _ => tracing::debug!(key = %path.key, "ETag is not an MD5 hash, skipping upload verification"),
            }
        }

        let mut info = ObjectInfo::file(&path.key, body.bytes_read() as i64);
        info.etag = etag;
        info.content_type = Some(
            options
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        );
        info.last_modified = Some(Timestamp::now());
        info.metadata = options.metadata;
        tracing::debug!(path = %path, bytes = body.bytes_read(), "Uploaded object");
        Ok(info)
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        let request = self.request(Method::DELETE, Some(&path.bucket), Some(&path.key), &[])?;
        self.perform(request, &[204]).await?;
        tracing::debug!(path = %path, "Deleted object");
        Ok(())
    }

    async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<ObjectInfo> {
        let provider = self.provider();
        let copy_source = format!("/{}/{}", src.bucket, encode_url_path(&src.key));

        let mut request = self.request(Method::PUT, Some(&dst.bucket), Some(&dst.key), &[])?;
        request
            .headers
            .insert(header_name(&provider.copy_source_header())?, header_value(&copy_source)?);
        request.headers.insert(
            header_name(&provider.metadata_directive_header())?,
            HeaderValue::from_static("COPY"),
        );

        let response = self.perform(request, &[200]).await?;
        let text = self.result_document(response, "Copy").await?;
        let result: CopyObjectResult = from_xml(&text)?;

        // The copy result carries no size
        let mut info = self.head_object(dst).await?;
        if let Some(etag) = result.etag {
            info.etag = Some(unquote_etag(&etag).to_string());
        }
        Ok(info)
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidRequest(format!("Invalid header value '{value}': {e}")))
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidRequest(format!("Invalid header name '{name}': {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::tests::{Scripted, ScriptedTransport};
    use reqwest::header::AUTHORIZATION;
    use std::collections::BTreeMap;

    pub(crate) fn client(transport: Arc<ScriptedTransport>) -> StorageClient {
        let alias = Alias::new("test", "https://s3.amazonaws.com", "AKID", "secret");
        let settings = HttpSettings {
            retry_max: 1,
            internal_error_retry_max: 1,
            ..HttpSettings::default()
        };
        StorageClient::with_transport(alias, &settings, transport).unwrap()
    }

    fn path(bucket: &str, key: &str) -> RemotePath {
        RemotePath::new("test", bucket, key)
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let transport = ScriptedTransport::new(vec![Scripted::status(200).xml(
            "<ListAllMyBucketsResult><Buckets>\
             <Bucket><Name>photos</Name><CreationDate>2009-02-03T16:45:09.000Z</CreationDate></Bucket>\
             </Buckets></ListAllMyBucketsResult>",
        )]);
        let store = client(Arc::clone(&transport));

        let buckets = store.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].key, "photos");
        assert!(buckets[0].is_dir);
        assert!(buckets[0].last_modified.is_some());

        let seen = transport.seen();
        assert_eq!(seen[0].url.as_str(), "https://s3.amazonaws.com/");
    }

    #[tokio::test]
    async fn test_list_objects_builds_query() {
        let transport = ScriptedTransport::new(vec![Scripted::status(200).xml(
            "<ListBucketResult><Name>photos</Name><IsTruncated>true</IsTruncated>\
             <Contents><Key>2006/a.jpg</Key><ETag>\"abc\"</ETag><Size>10</Size></Contents>\
             <CommonPrefixes><Prefix>2006/jan/</Prefix></CommonPrefixes>\
             </ListBucketResult>",
        )]);
        let store = client(Arc::clone(&transport));

        let result = store
            .list_objects(&path("photos", "2006/"), ListOptions::default())
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.next_marker.as_deref(), Some("2006/a.jpg"));
        assert_eq!(result.items.len(), 2);
        assert!(result.items[0].is_dir);
        assert_eq!(result.items[1].etag.as_deref(), Some("abc"));

        let url = &transport.seen()[0].url;
        assert_eq!(url.host_str(), Some("photos.s3.amazonaws.com"));
        assert_eq!(url.query(), Some("prefix=2006%2F&delimiter=%2F"));
    }

    #[tokio::test]
    async fn test_bucket_status() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).xml("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"),
            Scripted::status(404).xml("<Error><Code>NoSuchBucket</Code></Error>"),
            Scripted::status(403).xml("<Error><Code>AccessDenied</Code></Error>"),
            Scripted::status(400).xml("<Error><Code>InvalidBucketName</Code></Error>"),
        ]);
        let store = client(Arc::clone(&transport));

        assert_eq!(store.bucket_status("mine").await.unwrap(), BucketStatus::Mine);
        assert_eq!(store.bucket_status("missing").await.unwrap(), BucketStatus::DoesNotExist);
        assert_eq!(store.bucket_status("taken").await.unwrap(), BucketStatus::AlreadyClaimed);
        assert!(store.bucket_status("bad").await.is_err());
        assert_eq!(transport.seen()[0].url.query(), Some("max-keys=0"));
    }

    #[tokio::test]
    async fn test_create_bucket_with_location() {
        let transport = ScriptedTransport::new(vec![Scripted::status(200), Scripted::status(200)]);
        let store = client(Arc::clone(&transport));

        store.create_bucket("eu-bucket", Some("EU")).await.unwrap();
        store.create_bucket("us-bucket", None).await.unwrap();

        let seen = transport.seen();
        let body = String::from_utf8(seen[0].body.clone().unwrap()).unwrap();
        assert!(body.contains("<LocationConstraint>EU</LocationConstraint>"));
        assert!(seen[1].body.is_none());
        assert_eq!(seen[1].headers.get(CONTENT_LENGTH).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_put_object_verifies_etag() {
        let data = b"hello world".to_vec();
        let md5 = hex::encode(<md5::Md5 as md5::Digest>::digest(&data));
        let transport = ScriptedTransport::new(vec![Scripted::status(200).header("etag", format!("\"{md5}\""))]);
        let store = client(Arc::clone(&transport));

        let options = PutOptions {
            metadata: BTreeMap::from([("color".to_string(), "blue".to_string())]),
            acl: Some(CannedAcl::PublicRead),
            ..PutOptions::default()
        };
        let info = store
            .put_object(&path("bucket", "greeting.txt"), ObjectSource::Bytes(data.clone()), options)
            .await
            .unwrap();
        assert_eq!(info.etag.as_deref(), Some(md5.as_str()));
        assert_eq!(info.size_bytes, Some(11));

        let seen = transport.seen();
        assert_eq!(seen[0].body.as_deref(), Some(data.as_slice()));
        assert_eq!(seen[0].headers.get(CONTENT_TYPE).unwrap(), DEFAULT_CONTENT_TYPE);
        assert_eq!(seen[0].headers.get("x-amz-meta-color").unwrap(), "blue");
        assert_eq!(seen[0].headers.get("x-amz-acl").unwrap(), "public-read");
        assert!(seen[0].headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_put_object_md5_mismatch_is_error() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).header("etag", "\"00000000000000000000000000000000\""),
        ]);
        let store = client(Arc::clone(&transport));

        let err = store
            .put_object(
                &path("bucket", "k"),
                ObjectSource::Bytes(b"payload".to_vec()),
                PutOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[tokio::test]
    async fn test_put_stream_of_unknown_length_is_buffered() {
        let data = b"streamed from stdin".to_vec();
        let md5 = hex::encode(<md5::Md5 as md5::Digest>::digest(&data));
        let transport = ScriptedTransport::new(vec![
            Scripted::status(500),
            Scripted::status(200).header("etag", format!("\"{md5}\"")),
        ]);
        let store = client(Arc::clone(&transport));

        let source = ObjectSource::Reader {
            reader: Box::new(std::io::Cursor::new(data.clone())),
            length: None,
        };
        let info = store
            .put_object(&path("bucket", "stdin.log"), source, PutOptions::default())
            .await
            .unwrap();
        assert_eq!(info.size_bytes, Some(data.len() as i64));

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        for attempt in &seen {
            assert_eq!(attempt.content_length, Some(data.len() as u64));
            assert_eq!(attempt.body.as_deref(), Some(data.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_put_stream_of_unknown_length_checks_etag() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).header("etag", "\"00000000000000000000000000000000\""),
        ]);
        let store = client(Arc::clone(&transport));

        let source = ObjectSource::Reader {
            reader: Box::new(std::io::Cursor::new(b"payload".to_vec())),
            length: None,
        };
        let err = store
            .put_object(&path("bucket", "k"), source, PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[tokio::test]
    async fn test_put_object_sends_supplied_content_md5() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).header("etag", "\"00000000000000000000000000000000\""),
        ]);
        let store = client(Arc::clone(&transport));

        let options = PutOptions {
            content_md5: Some("XrY7u+Ae7tCTyyK7j1rNww==".to_string()),
            ..PutOptions::default()
        };
        store
            .put_object(&path("bucket", "k"), ObjectSource::Bytes(b"hello world".to_vec()), options)
            .await
            .unwrap();
        assert_eq!(
            transport.seen()[0].headers.get("content-md5").unwrap(),
            "XrY7u+Ae7tCTyyK7j1rNww=="
        );
    }

    #[tokio::test]
    async fn test_head_object_metadata() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200)
                .header("etag", "\"828ef3fdfa96f00ad9f27c383fc9ac7f\"")
                .header("content-type", "text/plain")
                .header("x-amz-meta-color", "blue")
                .header("last-modified", "Sun, 01 Jan 2006 12:00:00 GMT"),
        ]);
        let store = client(Arc::clone(&transport));

        let info = store.head_object(&path("bucket", "k")).await.unwrap();
        assert_eq!(info.etag.as_deref(), Some("828ef3fdfa96f00ad9f27c383fc9ac7f"));
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert_eq!(info.metadata.get("color").map(String::as_str), Some("blue"));
        assert!(info.last_modified.is_some());
        assert_eq!(transport.seen()[0].method, Method::HEAD);
    }

    #[tokio::test]
    async fn test_head_missing_object_is_not_found() {
        let transport = ScriptedTransport::new(vec![Scripted::status(404)]);
        let store = client(Arc::clone(&transport));

        let err = store.head_object(&path("bucket", "nope")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn test_get_object_sends_conditions() {
        let transport = ScriptedTransport::new(vec![Scripted::status(206).body(b"ell")]);
        let store = client(Arc::clone(&transport));

        let options = GetOptions {
            range_start: Some(1),
            range_end: Some(3),
            if_match: vec!["\"abc\"".into()],
            ..GetOptions::default()
        };
        let data = store.get_object(&path("bucket", "k"), options).await.unwrap();
        assert_eq!(data.bytes().await.unwrap(), b"ell");

        let seen = transport.seen();
        assert_eq!(seen[0].headers.get(RANGE).unwrap(), "bytes=1-3");
        assert_eq!(seen[0].headers.get(IF_MATCH).unwrap(), "\"abc\"");
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test]
    async fn test_copy_object_error_in_ok_response() {
        let transport = ScriptedTransport::new(vec![Scripted::status(200).xml(
            "<Error><Code>InternalError</Code><Message>We encountered an internal error.</Message></Error>",
        )]);
        let store = client(Arc::clone(&transport));

        let err = store
            .copy_object(&path("src", "a b.txt"), &path("dst", "copy.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some("InternalError"));

        let seen = transport.seen();
        assert_eq!(seen[0].headers.get("x-amz-copy-source").unwrap(), "/src/a%20b.txt");
        assert_eq!(seen[0].headers.get("x-amz-metadata-directive").unwrap(), "COPY");
    }

    #[tokio::test]
    async fn test_copy_object_heads_destination() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).xml("<CopyObjectResult><ETag>\"new\"</ETag></CopyObjectResult>"),
            Scripted::status(200).header("etag", "\"old\""),
        ]);
        let store = client(Arc::clone(&transport));

        let info = store
            .copy_object(&path("src", "a.txt"), &path("dst", "b.txt"))
            .await
            .unwrap();
        assert_eq!(info.etag.as_deref(), Some("new"));
        assert_eq!(transport.seen()[1].method, Method::HEAD);
    }

    #[tokio::test]
    async fn test_bucket_location_and_acl() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(200).xml("<LocationConstraint>EU</LocationConstraint>"),
            Scripted::status(200),
        ]);
        let store = client(Arc::clone(&transport));

        assert_eq!(store.bucket_location("bucket").await.unwrap().as_deref(), Some("EU"));
        store
            .put_object_acl(&path("bucket", "k"), CannedAcl::Private)
            .await
            .unwrap();

        let seen = transport.seen();
        assert_eq!(seen[0].url.query(), Some("location"));
        assert_eq!(seen[1].url.query(), Some("acl"));
        assert_eq!(seen[1].headers.get("x-amz-acl").unwrap(), "private");
    }

    #[test]
    fn test_presigned_get_url() {
        let transport = ScriptedTransport::new(vec![]);
        let store = client(transport);
        let expires = Timestamp::from_second(1_175_139_620).unwrap();

        let url = store.presign_get(&path("johnsmith", "photos/puppy.jpg"), expires).unwrap();
        assert!(url.starts_with("https://johnsmith.s3.amazonaws.com/photos/puppy.jpg?"));
        assert!(url.contains("AWSAccessKeyId=AKID"));
        assert!(url.contains("Expires=1175139620"));
        assert!(url.contains("Signature="));
    }
}
