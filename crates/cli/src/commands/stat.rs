//! stat command - Show object metadata
//!
//! Displays the metadata returned by a HEAD request for an object, or the
//! ownership status and location of a bucket.

use std::collections::BTreeMap;
use std::fmt;

use clap::Args;
use serde::Serialize;
use stowage_core::{BucketStatus, ObjectInfo, ObjectStore};

use super::{connect, remote_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Show object metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object or bucket path (alias/bucket[/key])
    pub path: String,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl StatOutput {
    fn new(name: String, info: ObjectInfo) -> Self {
        Self {
            name,
            last_modified: info.last_modified.map(|t| t.to_string()),
            size_bytes: info.size_bytes,
            size_human: info.size_human,
            etag: info.etag,
            content_type: info.content_type,
            storage_class: info.storage_class,
            version_id: info.version_id,
            metadata: info.metadata,
        }
    }
}

impl fmt::Display for StatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name      : {}", self.name)?;
        if let Some(date) = &self.last_modified {
            writeln!(f, "Date      : {date}")?;
        }
        if let (Some(human), Some(bytes)) = (&self.size_human, self.size_bytes) {
            writeln!(f, "Size      : {human} ({bytes} bytes)")?;
        }
        if let Some(etag) = &self.etag {
            writeln!(f, "ETag      : {etag}")?;
        }
        if let Some(ct) = &self.content_type {
            writeln!(f, "Type      : {ct}")?;
        }
        if let Some(class) = &self.storage_class {
            writeln!(f, "Class     : {class}")?;
        }
        if let Some(version) = &self.version_id {
            writeln!(f, "VersionID : {version}")?;
        }
        if !self.metadata.is_empty() {
            writeln!(f, "Metadata  :")?;
            for (k, v) in &self.metadata {
                writeln!(f, "  {k}: {v}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct BucketStatOutput {
    name: String,
    status: BucketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl fmt::Display for BucketStatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            BucketStatus::Mine => "owned by you",
            BucketStatus::DoesNotExist => "does not exist",
            BucketStatus::AlreadyClaimed => "owned by another account",
        };
        writeln!(f, "Name      : {}", self.name)?;
        writeln!(f, "Status    : {status}")?;
        if let Some(location) = &self.location {
            writeln!(f, "Location  : {location}")?;
        }
        Ok(())
    }
}

/// Execute the stat command
pub async fn execute(args: StatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_arg(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    if path.is_bucket() {
        let status = match client.bucket_status(&path.bucket).await {
            Ok(s) => s,
            Err(e) => return formatter.fail(&format!("Failed to stat {path}"), &e),
        };
        let location = if status == BucketStatus::Mine {
            match client.bucket_location(&path.bucket).await {
                Ok(location) => location,
                Err(e) => return formatter.fail(&format!("Failed to get location of {path}"), &e),
            }
        } else {
            None
        };
        formatter.output(&BucketStatOutput {
            name: path.to_full_path(),
            status,
            location,
        });
        return ExitCode::Success;
    }

    match client.head_object(&path).await {
        Ok(info) => {
            formatter.output(&StatOutput::new(path.to_full_path(), info));
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to stat {path}"), &e),
    }
}
