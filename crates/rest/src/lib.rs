//! stowage-rest: REST client for S3 and Google Cloud Storage
//!
//! This crate implements the `ObjectStore` trait from stowage-core by
//! speaking the services' XML REST API directly: HMAC-SHA1 request signing,
//! bounded retry of transient failures, replayable upload bodies with
//! running MD5 hashes, and response bodies that release their connection
//! exactly once.

pub mod body;
pub mod client;
pub mod executor;
pub mod metadata;
pub mod multipart;
pub mod provider;
pub mod release;
pub mod signing;
pub mod throttle;
pub mod transport;
pub mod xml;

pub use body::RepeatableBody;
pub use client::StorageClient;
pub use executor::{RestExecutor, RestRequest, RestResponse};
pub use multipart::{MultipartConfig, MultipartUpload, UploadState, upload_file};
pub use provider::Provider;
pub use release::ReleasingBody;
pub use signing::{Endpoint, Signer};
pub use transport::{HttpTransport, ReqwestTransport};
