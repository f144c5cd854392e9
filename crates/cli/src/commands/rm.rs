//! rm command - Remove objects
//!
//! Removes one or more objects, or everything under a prefix with `--recursive`.

use clap::Args;
use serde::Serialize;
use stowage_core::{ListOptions, ObjectStore, RemotePath, Result};

use super::{connect, remote_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object path(s) to remove (alias/bucket/key or alias/bucket/prefix/)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove recursively (remove all objects with the given prefix)
    #[arg(short, long)]
    pub recursive: bool,

    /// Only show what would be deleted (dry run)
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
    total: usize,
    dry_run: bool,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut exit_code = ExitCode::Success;

    for raw in &args.paths {
        let path = match remote_arg(raw, &formatter) {
            Ok(p) => p,
            Err(code) => return code,
        };
        if path.is_bucket() {
            formatter.error(&format!("'{raw}' names a bucket. Use 'stow rb' to remove buckets"));
            return ExitCode::UsageError;
        }
        if path.is_dir && !args.recursive {
            formatter.error(&format!("'{raw}' is a prefix. Use -r/--recursive to remove everything under it"));
            return ExitCode::UsageError;
        }

        let client = match connect(&path.alias, &formatter) {
            Ok(c) => c,
            Err(code) => return code,
        };

        let targets = match collect_targets(&client, &path, args.recursive).await {
            Ok(t) => t,
            Err(e) => {
                exit_code = formatter.fail(&format!("Failed to list {path}"), &e);
                failed.push(path.to_full_path());
                continue;
            }
        };

        for target in targets {
            if args.dry_run {
                formatter.println(&format!("Would remove: {target}"));
                deleted.push(target.to_full_path());
                continue;
            }
            match client.delete_object(&target).await {
                Ok(()) => {
                    if !formatter.is_json() {
                        formatter.println(&format!("Removed: {target}"));
                    }
                    deleted.push(target.to_full_path());
                }
                Err(e) => {
                    exit_code = formatter.fail(&format!("Failed to remove {target}"), &e);
                    failed.push(target.to_full_path());
                }
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if failed.is_empty() { "success" } else { "partial" },
            total: deleted.len(),
            deleted,
            failed,
            dry_run: args.dry_run,
        });
    } else if !failed.is_empty() {
        formatter.warning(&format!(
            "Completed with errors: {} removed, {} failed",
            deleted.len(),
            failed.len()
        ));
    }
    exit_code
}

/// Objects an rm of `path` affects
///
/// A single key is returned as is; services report success for a missing
/// key, so it is not checked first.
async fn collect_targets(store: &dyn ObjectStore, path: &RemotePath, recursive: bool) -> Result<Vec<RemotePath>> {
    if !recursive {
        return Ok(vec![path.clone()]);
    }

    let base = RemotePath::new(&path.alias, &path.bucket, "");
    let mut targets = Vec::new();
    let mut marker = None;
    loop {
        let options = ListOptions {
            recursive: true,
            max_keys: Some(1000),
            marker: marker.take(),
            ..Default::default()
        };
        let page = store.list_objects(path, options).await?;
        targets.extend(page.items.iter().filter(|i| !i.is_dir).map(|i| base.join(&i.key)));
        match page.next_marker {
            Some(next) if page.truncated => marker = Some(next),
            _ => break,
        }
    }
    Ok(targets)
}
