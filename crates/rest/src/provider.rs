//! Service dialects
//!
//! S3 and the Google Cloud Storage interoperable API speak the same REST
//! protocol with different header prefixes, signature identifiers and
//! subresource names. Everything vendor specific is answered here.

use std::fmt;
use std::str::FromStr;

use stowage_core::Error;

const S3_RESOURCE_PARAMETERS: &[&str] = &[
    "acl",
    "policy",
    "torrent",
    "logging",
    "location",
    "requestPayment",
    "versions",
    "versioning",
    "versionId",
    "uploads",
    "uploadId",
    "partNumber",
    "website",
    "notification",
];

const GCS_RESOURCE_PARAMETERS: &[&str] = &["acl", "location", "logging", "torrent"];

/// Storage service dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Amazon S3 and compatible services
    S3,
    /// Google Cloud Storage interoperable (XML) API
    GoogleStorage,
}

impl Provider {
    /// Short name as written in configuration
    pub const fn name(&self) -> &'static str {
        match self {
            Provider::S3 => "s3",
            Provider::GoogleStorage => "gcs",
        }
    }

    /// Prefix of service-specific headers, e.g. `x-amz-`
    pub const fn header_prefix(&self) -> &'static str {
        match self {
            Provider::S3 => "x-amz-",
            Provider::GoogleStorage => "x-goog-",
        }
    }

    /// Prefix of user metadata headers
    pub const fn metadata_prefix(&self) -> &'static str {
        match self {
            Provider::S3 => "x-amz-meta-",
            Provider::GoogleStorage => "x-goog-meta-",
        }
    }

    /// Identifier placed before the credentials in `Authorization`
    pub const fn signature_identifier(&self) -> &'static str {
        match self {
            Provider::S3 => "AWS",
            Provider::GoogleStorage => "GOOG1",
        }
    }

    /// Host used when an alias doesn't name one
    pub const fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::S3 => "s3.amazonaws.com",
            Provider::GoogleStorage => "commondatastorage.googleapis.com",
        }
    }

    /// Query parameters that identify a subresource and must be signed
    pub const fn resource_parameter_names(&self) -> &'static [&'static str] {
        match self {
            Provider::S3 => S3_RESOURCE_PARAMETERS,
            Provider::GoogleStorage => GCS_RESOURCE_PARAMETERS,
        }
    }

    /// Whether a query parameter is part of the signed resource
    pub fn is_resource_parameter(&self, name: &str) -> bool {
        self.resource_parameter_names().contains(&name)
    }

    /// Header that replaces `Date` in the canonical string when present
    pub const fn alternate_date_header(&self) -> &'static str {
        match self {
            Provider::S3 => "x-amz-date",
            Provider::GoogleStorage => "x-goog-date",
        }
    }

    /// Response header carrying the request id
    pub const fn request_id_header(&self) -> &'static str {
        match self {
            Provider::S3 => "x-amz-request-id",
            Provider::GoogleStorage => "x-goog-request-id",
        }
    }

    /// Response header carrying the extended host id
    pub const fn host_id_header(&self) -> &'static str {
        match self {
            Provider::S3 => "x-amz-id-2",
            Provider::GoogleStorage => "x-goog-id-2",
        }
    }

    /// Header applying a canned ACL
    pub fn acl_header(&self) -> String {
        format!("{}acl", self.header_prefix())
    }

    /// Header naming the storage class of an upload
    pub fn storage_class_header(&self) -> String {
        format!("{}storage-class", self.header_prefix())
    }

    /// Header naming the source of a server-side copy
    pub fn copy_source_header(&self) -> String {
        format!("{}copy-source", self.header_prefix())
    }

    /// Header choosing whether a copy keeps or replaces metadata
    pub fn metadata_directive_header(&self) -> String {
        format!("{}metadata-directive", self.header_prefix())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "aws" => Ok(Provider::S3),
            "gcs" | "gs" | "google" => Ok(Provider::GoogleStorage),
            other => Err(Error::Config(format!(
                "Unknown provider '{other}'. Expected 's3' or 'gcs'"
            ))),
        }
    }
}
