//! mb command - Make bucket
//!
//! Creates a new bucket, optionally in a location and with a canned ACL.

use clap::Args;
use serde::Serialize;
use stowage_core::{BucketStatus, CannedAcl, Error, ObjectStore, Result};

use super::{connect, remote_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Create a bucket
#[derive(Args, Debug)]
pub struct MbArgs {
    /// Target path (alias/bucket)
    pub target: String,

    /// Ignore error if bucket already exists
    #[arg(short = 'p', long)]
    pub ignore_existing: bool,

    /// Location constraint, e.g. "EU" or "us-west-1"
    #[arg(long)]
    pub location: Option<String>,

    /// Canned ACL to apply to the new bucket
    #[arg(long)]
    pub acl: Option<CannedAcl>,
}

#[derive(Debug, Serialize)]
struct MbOutput {
    status: &'static str,
    bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    created: bool,
}

/// Execute the mb command
pub async fn execute(args: MbArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_arg(args.target.trim_end_matches('/'), &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };
    if !path.is_bucket() {
        formatter.error("Bucket path must not include a key. Use format: alias/bucket");
        return ExitCode::UsageError;
    }
    if let Err(msg) = validate_bucket_name(&path.bucket) {
        formatter.error(&msg);
        return ExitCode::UsageError;
    }

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let created = match make_bucket(&client, &path.bucket, args.location.as_deref(), args.ignore_existing).await {
        Ok(created) => created,
        Err(e) => return formatter.fail(&format!("Failed to create bucket '{path}'"), &e),
    };

    if created
        && let Some(acl) = args.acl
        && let Err(e) = client.put_bucket_acl(&path.bucket, acl).await
    {
        return formatter.fail(&format!("Bucket '{path}' created but applying ACL failed"), &e);
    }

    if formatter.is_json() {
        formatter.json(&MbOutput {
            status: "success",
            bucket: path.bucket.clone(),
            location: args.location,
            created,
        });
    } else if created {
        formatter.success(&format!("Bucket '{path}' created successfully."));
    } else {
        formatter.success(&format!("Bucket '{path}' already exists."));
    }
    ExitCode::Success
}

/// Create a bucket unless the caller already owns it
///
/// Returns whether a bucket was created. A name claimed by another account
/// is a conflict even with `ignore_existing`.
async fn make_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    location: Option<&str>,
    ignore_existing: bool,
) -> Result<bool> {
    match store.bucket_status(bucket).await? {
        BucketStatus::Mine if ignore_existing => Ok(false),
        BucketStatus::Mine => Err(Error::Conflict(format!("bucket '{bucket}' already exists"))),
        BucketStatus::AlreadyClaimed => Err(Error::Conflict(format!(
            "bucket name '{bucket}' is owned by another account"
        ))),
        BucketStatus::DoesNotExist => {
            store.create_bucket(bucket, location).await?;
            Ok(true)
        }
    }
}

/// Basic bucket name checks shared by both services
fn validate_bucket_name(bucket: &str) -> std::result::Result<(), String> {
    if bucket.len() < 3 || bucket.len() > 63 {
        return Err("Bucket name must be between 3 and 63 characters".to_string());
    }
    if !bucket
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(format!("Invalid character in bucket name '{bucket}'"));
    }
    Ok(())
}
