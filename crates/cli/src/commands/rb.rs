//! rb command - Remove bucket
//!
//! Removes a bucket. With `--force` its objects are deleted first.

use clap::Args;
use serde::Serialize;
use stowage_core::{Error, ListOptions, ObjectStore, RemotePath, Result};

use super::{connect, remote_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove a bucket
#[derive(Args, Debug)]
pub struct RbArgs {
    /// Target path (alias/bucket)
    pub target: String,

    /// Force remove even if bucket is not empty (deletes all objects first)
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct RbOutput {
    status: &'static str,
    bucket: String,
    objects_deleted: usize,
}

/// Execute the rb command
pub async fn execute(args: RbArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_arg(args.target.trim_end_matches('/'), &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };
    if !path.is_bucket() {
        formatter.error("Bucket path must not include a key. Use format: alias/bucket");
        return ExitCode::UsageError;
    }

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    match remove_bucket(&client, &path, args.force).await {
        Ok(objects_deleted) => {
            if formatter.is_json() {
                formatter.json(&RbOutput {
                    status: "success",
                    bucket: path.bucket.clone(),
                    objects_deleted,
                });
            } else {
                formatter.success(&format!("Bucket '{path}' removed successfully."));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to remove bucket '{path}'"), &e),
    }
}

/// Delete a bucket, emptying it first when `force` is set
///
/// Returns the number of objects deleted.
async fn remove_bucket(store: &dyn ObjectStore, path: &RemotePath, force: bool) -> Result<usize> {
    let mut deleted = 0;
    loop {
        let options = ListOptions {
            recursive: true,
            max_keys: Some(1000),
            ..Default::default()
        };
        let page = store.list_objects(path, options).await?;
        if page.items.is_empty() {
            break;
        }
        if !force {
            return Err(Error::Conflict(format!(
                "bucket '{}' is not empty, use --force to delete its objects",
                path.bucket
            )));
        }
        for item in page.items.iter().filter(|i| !i.is_dir) {
            store.delete_object(&path.join(&item.key)).await?;
            deleted += 1;
        }
        tracing::debug!(bucket = %path.bucket, deleted, "Emptying bucket");
    }

    store.delete_bucket(&path.bucket).await?;
    Ok(deleted)
}
