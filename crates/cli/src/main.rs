//! stow - command-line client for S3 and Google Cloud Storage

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use stowage_cli::commands::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let exit_code = commands::interruptible(commands::execute(cli), tokio::signal::ctrl_c()).await;

    std::process::exit(exit_code.as_i32());
}
