//! CLI command definitions and execution
//!
//! Each command lives in its own module with an `Args` struct and an
//! `execute` function returning an [`ExitCode`]. Commands that talk to a
//! service resolve their alias through [`connect`].

use clap::{Parser, Subcommand};
use stowage_core::{Alias, AliasManager, HttpSettings, ParsedPath, RemotePath, Result as CoreResult, parse_path};
use stowage_rest::{StorageClient, throttle};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod alias;
mod cat;
mod completions;
mod cp;
mod ls;
mod mb;
mod pipe;
mod rb;
mod rm;
mod share;
mod stat;
#[cfg(test)]
mod test_support;

/// stow - client for S3 and Google Cloud Storage
///
/// Talks to the services' XML REST API with signed requests, bounded retry
/// of transient failures and MD5 verification of uploads.
#[derive(Parser, Debug)]
#[command(name = "stow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage service aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// List buckets and objects
    Ls(ls::LsArgs),

    /// Create a bucket
    Mb(mb::MbArgs),

    /// Remove a bucket
    Rb(rb::RbArgs),

    /// Display object contents
    Cat(cat::CatArgs),

    /// Show object metadata
    Stat(stat::StatArgs),

    /// Copy objects (local<->remote, remote<->remote)
    Cp(cp::CpArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// Stream stdin to an object
    Pipe(pipe::PipeArgs),

    /// Generate a presigned URL for an object
    Share(share::ShareArgs),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Alias(cmd) => alias::execute(cmd, output_config).await,
        Commands::Ls(args) => ls::execute(args, output_config).await,
        Commands::Mb(args) => mb::execute(args, output_config).await,
        Commands::Rb(args) => rb::execute(args, output_config).await,
        Commands::Cat(args) => cat::execute(args, output_config).await,
        Commands::Stat(args) => stat::execute(args, output_config).await,
        Commands::Cp(args) => cp::execute(args, output_config).await,
        Commands::Rm(args) => rm::execute(args, output_config).await,
        Commands::Pipe(args) => pipe::execute(args, output_config).await,
        Commands::Share(args) => share::execute(args, output_config),
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Run `command` unless `interrupt` fires first
///
/// Dropping the command future cancels its in-flight requests. If the
/// signal handler cannot be installed the command runs to completion.
pub async fn interruptible<C, I>(command: C, interrupt: I) -> ExitCode
where
    C: Future<Output = ExitCode>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(command);
    let signal = tokio::select! {
        code = &mut command => return code,
        signal = interrupt => signal,
    };
    match signal {
        Ok(()) => {
            eprintln!("Interrupted");
            ExitCode::Interrupted
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            command.await
        }
    }
}

/// Build a client for a configured alias
pub(crate) fn connect(alias_name: &str, formatter: &Formatter) -> Result<StorageClient, ExitCode> {
    let manager = AliasManager::new().map_err(|e| formatter.fail("Failed to load configuration", &e))?;
    let global = manager
        .http_settings()
        .map_err(|e| formatter.fail("Failed to load configuration", &e))?;
    let alias = manager
        .get(alias_name)
        .map_err(|e| formatter.fail("Unknown alias", &e))?;

    client_for(alias, &global).map_err(|e| formatter.fail("Failed to create client", &e))
}

/// Build a client and install the upload throttle
///
/// The throttle is shared by every upload in the process, so its limit comes
/// from the global `[http]` settings. Per-alias overrides of the limit are
/// ignored; a copy between two aliases runs under one limit.
fn client_for(alias: Alias, global: &HttpSettings) -> CoreResult<StorageClient> {
    throttle::set_global_limit(global.max_upload_bytes_per_second);
    StorageClient::new(alias, global)
}

/// Parse an argument that must name a remote bucket or object
pub(crate) fn remote_arg(path: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    match parse_path(path) {
        Ok(ParsedPath::Remote(remote)) => Ok(remote),
        Ok(ParsedPath::Local(_)) => {
            formatter.error(&format!(
                "'{path}' is not a remote path. Use format: alias/bucket[/key]"
            ));
            Err(ExitCode::UsageError)
        }
        Err(e) => Err(formatter.fail("Invalid path", &e)),
    }
}

/// Parse an argument that must name an object, not a bucket
pub(crate) fn object_arg(path: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    let remote = remote_arg(path, formatter)?;
    if remote.key.is_empty() || remote.key.ends_with('/') {
        formatter.error(&format!("'{path}' does not name an object. Use format: alias/bucket/key"));
        return Err(ExitCode::UsageError);
    }
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[tokio::test]
    async fn test_interrupt_stops_running_command() {
        let code = interruptible(std::future::pending(), async { Ok(()) }).await;
        assert_eq!(code, ExitCode::Interrupted);
    }

    #[tokio::test]
    async fn test_finished_command_wins_over_idle_signal() {
        let code = interruptible(async { ExitCode::NotFound }, std::future::pending()).await;
        assert_eq!(code, ExitCode::NotFound);
    }

    #[tokio::test]
    async fn test_missing_signal_handler_lets_command_finish() {
        let code = interruptible(
            async {
                tokio::task::yield_now().await;
                ExitCode::Success
            },
            async { Err(std::io::Error::other("no signal support")) },
        )
        .await;
        assert_eq!(code, ExitCode::Success);
    }

    #[test]
    fn test_throttle_limit_comes_from_global_settings() {
        let global = HttpSettings {
            max_upload_bytes_per_second: Some(4096),
            ..HttpSettings::default()
        };
        let mut fast = Alias::new("fast", "http://a:9000", "a", "a");
        fast.http = Some(HttpSettings {
            max_upload_bytes_per_second: Some(1 << 30),
            ..HttpSettings::default()
        });
        let slow = Alias::new("slow", "http://b:9000", "b", "b");

        client_for(slow, &global).unwrap();
        client_for(fast, &global).unwrap();
        assert_eq!(throttle::global().unwrap().bytes_per_second(), 4096);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stow", "ls", "s3/bucket", "--json", "--debug"]).unwrap();
        assert!(cli.json);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Ls(_)));
    }

    #[test]
    fn test_remote_arg() {
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let remote = remote_arg("s3/bucket/a/b.txt", &formatter).unwrap();
        assert_eq!(remote.alias, "s3");
        assert_eq!(remote.bucket, "bucket");
        assert_eq!(remote.key, "a/b.txt");

        assert_eq!(remote_arg("./local.txt", &formatter).unwrap_err(), ExitCode::UsageError);
        assert_eq!(remote_arg("", &formatter).unwrap_err(), ExitCode::UsageError);
    }

    #[test]
    fn test_object_arg_requires_key() {
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        assert!(object_arg("s3/bucket/key", &formatter).is_ok());
        assert_eq!(object_arg("s3/bucket", &formatter).unwrap_err(), ExitCode::UsageError);
        assert_eq!(object_arg("s3/bucket/dir/", &formatter).unwrap_err(), ExitCode::UsageError);
    }
}
