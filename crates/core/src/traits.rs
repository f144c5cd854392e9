//! ObjectStore trait definition
//!
//! This trait defines the interface for bucket and object operations.
//! It allows the CLI to be decoupled from the REST client that implements it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::acl::CannedAcl;
use crate::error::Result;
use crate::path::RemotePath;

/// Callback receiving the running count of bytes transferred
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Streaming object content
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata for an object or bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key or bucket name
    pub key: String,

    /// Size in bytes (None for buckets)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,

    /// Human-readable size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_human: Option<String>,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    /// ETag without surrounding quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Storage class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Version id, when the bucket is versioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    /// User metadata with the vendor prefix removed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    /// Whether this is a directory/prefix
    pub is_dir: bool,
}

impl ObjectInfo {
    /// Create a new ObjectInfo for a file
    pub fn file(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            is_dir: false,
            ..Self::default()
        }
        .with_size(size)
    }

    /// Create a new ObjectInfo for a directory/prefix
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_dir: true,
            ..Self::default()
        }
    }

    /// Create a new ObjectInfo for a bucket
    pub fn bucket(name: impl Into<String>) -> Self {
        Self::dir(name)
    }

    /// Set the size and its human-readable form
    pub fn with_size(mut self, size: i64) -> Self {
        self.size_bytes = Some(size);
        self.size_human = Some(humansize::format_size(
            size.max(0) as u64,
            humansize::BINARY,
        ));
        self
    }
}

/// Result of a list operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResult {
    /// Listed objects
    pub items: Vec<ObjectInfo>,

    /// Whether the result is truncated (more items available)
    pub truncated: bool,

    /// Marker to pass to the next request when truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

/// Options for list operations
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum number of keys to return per request
    pub max_keys: Option<u32>,

    /// Delimiter for grouping (usually "/")
    pub delimiter: Option<String>,

    /// Prefix to filter by
    pub prefix: Option<String>,

    /// Start listing after this key
    pub marker: Option<String>,

    /// Whether to list recursively (ignore delimiter)
    pub recursive: bool,
}

/// Conditions and range for a download
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// First byte to return, inclusive
    pub range_start: Option<u64>,

    /// Last byte to return, inclusive
    pub range_end: Option<u64>,

    /// Only return the object if it changed after this time
    pub if_modified_since: Option<Timestamp>,

    /// Only return the object if it has not changed since this time
    pub if_unmodified_since: Option<Timestamp>,

    /// Only return the object if its ETag matches one of these
    pub if_match: Vec<String>,

    /// Only return the object if its ETag matches none of these
    pub if_none_match: Vec<String>,

    /// Specific version to fetch
    pub version_id: Option<String>,
}

impl GetOptions {
    /// Value for the `Range` header, if a range was requested
    pub fn range_header(&self) -> Option<String> {
        match (self.range_start, self.range_end) {
            (None, None) => None,
            (start, end) => Some(format!(
                "bytes={}-{}",
                start.unwrap_or(0),
                end.map(|e| e.to_string()).unwrap_or_default()
            )),
        }
    }
}

/// Options for an upload
#[derive(Clone, Default)]
pub struct PutOptions {
    /// Content type, `application/octet-stream` when unset
    pub content_type: Option<String>,

    /// Canned ACL to apply
    pub acl: Option<CannedAcl>,

    /// Storage class, e.g. `REDUCED_REDUNDANCY`
    pub storage_class: Option<String>,

    /// User metadata, without the vendor prefix
    pub metadata: BTreeMap<String, String>,

    /// Base64 MD5 of the content, when known up front
    pub content_md5: Option<String>,

    /// Called with the running count of bytes sent
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for PutOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutOptions")
            .field("content_type", &self.content_type)
            .field("acl", &self.acl)
            .field("storage_class", &self.storage_class)
            .field("metadata", &self.metadata)
            .field("content_md5", &self.content_md5)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Upload content
pub enum ObjectSource {
    /// In-memory content
    Bytes(Vec<u8>),

    /// A local file, read from the start
    File(PathBuf),

    /// A forward-only stream, e.g. stdin
    Reader {
        reader: ObjectReader,
        /// Total length, if known
        length: Option<u64>,
    },
}

impl std::fmt::Debug for ObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ObjectSource::File(p) => write!(f, "File({})", p.display()),
            ObjectSource::Reader { length, .. } => write!(f, "Reader(length={length:?})"),
        }
    }
}

/// Downloaded object: its metadata and a stream over the content
pub struct ObjectData {
    /// Metadata from the response headers
    pub info: ObjectInfo,

    /// Content stream; dropping it releases the connection
    pub reader: ObjectReader,
}

impl ObjectData {
    /// Read the whole content into memory
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl std::fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectData")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Ownership status of a bucket name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    /// Bucket exists and is accessible with the current credentials
    Mine,
    /// No bucket with this name exists
    DoesNotExist,
    /// Bucket exists but belongs to someone else
    AlreadyClaimed,
}

/// Trait for bucket and object storage operations
///
/// This trait is implemented by the REST client and can be mocked for testing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List buckets
    async fn list_buckets(&self) -> Result<Vec<ObjectInfo>>;

    /// List objects in a bucket or prefix
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult>;

    /// Check who, if anyone, owns a bucket name
    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus>;

    /// Create a bucket, optionally in a location
    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Get object metadata
    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo>;

    /// Download an object
    async fn get_object(&self, path: &RemotePath, options: GetOptions) -> Result<ObjectData>;

    /// Upload an object
    async fn put_object(
        &self,
        path: &RemotePath,
        source: ObjectSource,
        options: PutOptions,
    ) -> Result<ObjectInfo>;

    /// Delete an object
    async fn delete_object(&self, path: &RemotePath) -> Result<()>;

    /// Copy an object within the service, keeping its metadata
    async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<ObjectInfo>;
}
