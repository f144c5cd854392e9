//! cat command - Display object contents
//!
//! Streams an object, or a byte range of it, to stdout.

use clap::Args;
use stowage_core::{GetOptions, ObjectStore, RemotePath, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{connect, object_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Display object contents
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Object path (alias/bucket/key)
    pub path: String,

    /// Start at this byte offset
    #[arg(long)]
    pub offset: Option<u64>,

    /// Number of bytes to output
    #[arg(long)]
    pub length: Option<u64>,

    /// Only output if the object's ETag matches
    #[arg(long)]
    pub if_match: Option<String>,
}

impl CatArgs {
    fn get_options(&self) -> GetOptions {
        let range_start = match (self.offset, self.length) {
            (None, None) => None,
            (offset, _) => Some(offset.unwrap_or(0)),
        };
        let range_end = self
            .length
            .map(|len| range_start.unwrap_or(0) + len.saturating_sub(1));
        GetOptions {
            range_start,
            range_end,
            if_match: self.if_match.iter().cloned().collect(),
            ..Default::default()
        }
    }
}

/// Execute the cat command
pub async fn execute(args: CatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.length == Some(0) {
        formatter.error("--length must be greater than zero");
        return ExitCode::UsageError;
    }

    let path = match object_arg(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let mut stdout = tokio::io::stdout();
    match write_object(&client, &path, args.get_options(), &mut stdout).await {
        Ok(_) => ExitCode::Success,
        Err(e) => formatter.fail(&format!("Failed to read {path}"), &e),
    }
}

/// Copy an object's content to `out`, returning the number of bytes written
async fn write_object<W>(store: &dyn ObjectStore, path: &RemotePath, options: GetOptions, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut data = store.get_object(path, options).await?;
    let written = tokio::io::copy(&mut data.reader, out).await?;
    out.flush().await?;
    Ok(written)
}
