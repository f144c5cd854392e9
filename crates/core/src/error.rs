//! Error types for stowage-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.
//! Failures reported by the storage service itself are carried as a
//! [`ServiceError`], which holds whatever the service told us about the request.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for stowage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for stowage operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Alias not found
    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    /// Alias already exists
    #[error("Alias already exists: {0}")]
    AliasExists(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML document could not be parsed or built
    #[error("XML error: {0}")]
    Xml(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network error (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request could not be built, e.g. invalid metadata
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Uploaded data does not match what the service stored
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Error response from the storage service
    #[error("{0}")]
    Service(Box<ServiceError>),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) => 2,                        // UsageError
            Error::Config(_) => 2,                             // UsageError
            Error::InvalidRequest(_) => 2,                     // UsageError
            Error::Network(_) => 3,                            // NetworkError
            Error::Auth(_) => 4,                               // AuthError
            Error::NotFound(_) | Error::AliasNotFound(_) => 5, // NotFound
            Error::Conflict(_) | Error::AliasExists(_) => 6,   // Conflict
            Error::Service(e) => e.exit_code(),
            _ => 1, // GeneralError
        }
    }

    /// The service error, if this error came from the storage service
    pub fn as_service(&self) -> Option<&ServiceError> {
        match self {
            Error::Service(e) => Some(e),
            _ => None,
        }
    }

    /// Vendor error code (e.g. `NoSuchKey`) if the service supplied one
    pub fn error_code(&self) -> Option<&str> {
        self.as_service().and_then(|e| e.error_code.as_deref())
    }

    /// HTTP status of the failed request, if a response was received
    pub fn status_code(&self) -> Option<u16> {
        self.as_service().and_then(|e| e.status_code)
    }

    /// True when the service reported the bucket or object as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Service(e) => {
                e.status_code == Some(404)
                    || matches!(
                        e.error_code.as_deref(),
                        Some("NoSuchKey" | "NoSuchBucket" | "NotFound")
                    )
            }
            _ => false,
        }
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::Service(Box::new(err))
    }
}

/// Error reported by a storage service
///
/// Populated from the XML error document when the service sent one, and
/// from the HTTP exchange (status line, request id headers) otherwise.
#[derive(Debug, Clone, Default)]
pub struct ServiceError {
    /// Human readable summary
    pub message: String,

    /// HTTP status code of the response
    pub status_code: Option<u16>,

    /// HTTP status reason phrase
    pub status_text: Option<String>,

    /// Vendor error code, e.g. `NoSuchBucket`
    pub error_code: Option<String>,

    /// Vendor error message
    pub error_message: Option<String>,

    /// Request id assigned by the service
    pub request_id: Option<String>,

    /// Host id assigned by the service
    pub host_id: Option<String>,

    /// HTTP method of the failed request
    pub request_verb: Option<String>,

    /// Path (and query) of the failed request
    pub request_path: Option<String>,

    /// Value of the Host header sent
    pub request_host: Option<String>,

    /// Value of the Date header received
    pub response_date: Option<String>,

    /// All response headers
    pub response_headers: BTreeMap<String, String>,

    /// Raw XML error document, if one was received
    pub xml: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDocument {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
    host_id: Option<String>,
}

impl ServiceError {
    /// Create an error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Build an error from an XML error document
    ///
    /// Bodies that are not `<Error>` documents are kept verbatim as the
    /// vendor message so the caller still sees what the service sent.
    pub fn from_xml(message: impl Into<String>, xml: impl Into<String>) -> Self {
        let xml = xml.into();
        let mut err = Self::new(message);
        if let Ok(doc) = quick_xml::de::from_str::<ErrorDocument>(&xml) {
            err.error_code = doc.code;
            err.error_message = doc.message;
            err.request_id = doc.request_id;
            err.host_id = doc.host_id;
        } else {
            tracing::debug!("Error body is not an XML error document");
            err.error_message = Some(xml.clone());
        }
        err.xml = Some(xml);
        err
    }

    /// Whether the vendor fields came from an XML error document
    pub fn is_parsed_from_xml(&self) -> bool {
        self.xml.is_some() && self.error_code.is_some()
    }

    /// Record request and host ids, typically from response headers
    pub fn set_request_and_host_ids(&mut self, request_id: String, host_id: String) {
        self.request_id = Some(request_id);
        self.host_id = Some(host_id);
    }

    /// Exit code matching this error's HTTP status
    pub fn exit_code(&self) -> i32 {
        match self.status_code {
            Some(400) => 2,
            Some(401 | 403) => 4,
            Some(404) => 5,
            Some(409 | 412) => 6,
            Some(501) => 7,
            Some(500..=599) | None => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(status) = self.status_code {
            write!(f, " -- ResponseCode: {status}")?;
            if let Some(text) = &self.status_text {
                write!(f, ", ResponseStatus: {text}")?;
            }
        }
        if let Some(code) = &self.error_code {
            write!(f, ", ErrorCode: {code}")?;
        }
        if let Some(msg) = &self.error_message {
            write!(f, ", ErrorMessage: {msg}")?;
        }
        if let Some(id) = &self.request_id {
            write!(f, ", RequestId: {id}")?;
        }
        if let Some(id) = &self.host_id {
            write!(f, ", HostId: {id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}
