//! pipe command - Stream stdin to an object
//!
//! Stdin has no length up front, so the client reads it into memory before
//! sending. The upload then carries a Content-Length, can be retried, and
//! is checked against the returned ETag.

use clap::Args;
use serde::Serialize;
use stowage_core::{CannedAcl, ObjectReader, ObjectSource, ObjectStore, PutOptions};

use super::{connect, object_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, ProgressBar};

/// Stream stdin to an object
#[derive(Args, Debug)]
pub struct PipeArgs {
    /// Destination path (alias/bucket/key)
    pub target: String,

    /// Content type for the uploaded object
    #[arg(long)]
    pub content_type: Option<String>,

    /// Storage class for the object
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Canned ACL for the object
    #[arg(long)]
    pub acl: Option<CannedAcl>,
}

#[derive(Debug, Serialize)]
struct PipeOutput {
    status: &'static str,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

/// Execute the pipe command
pub async fn execute(args: PipeArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config.clone());

    let path = match object_arg(&args.target, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let progress = ProgressBar::spinner(&output_config, "stdin");
    let options = PutOptions {
        content_type: args.content_type,
        storage_class: args.storage_class,
        acl: args.acl,
        progress: progress.callback(),
        ..Default::default()
    };
    let reader: ObjectReader = Box::new(tokio::io::stdin());
    let source = ObjectSource::Reader { reader, length: None };

    let result = client.put_object(&path, source, options).await;
    progress.finish_and_clear();

    match result {
        Ok(info) => {
            if formatter.is_json() {
                formatter.json(&PipeOutput {
                    status: "success",
                    target: path.to_full_path(),
                    size_bytes: info.size_bytes,
                    etag: info.etag,
                });
            } else {
                let size = info.size_human.unwrap_or_else(|| "?".to_string());
                formatter.success(&format!("stdin -> {path} ({size})"));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to upload to {path}"), &e),
    }
}
