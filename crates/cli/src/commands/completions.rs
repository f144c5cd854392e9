//! Shell completion generation
//!
//! Scripts are generated from the clap command tree, so they always match
//! the installed binary's subcommands and flags.

use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_complete::Shell;

use super::Cli;
use crate::exit_code::ExitCode;

/// Arguments for the completions command
#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Generate shell completions
pub fn execute(args: CompletionsArgs) -> ExitCode {
    let script = render(args.shell);

    let written = match &args.output {
        Some(path) => std::fs::write(path, &script),
        None => std::io::stdout().write_all(&script),
    };
    match written {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            eprintln!("Error: failed to write completions: {e}");
            ExitCode::GeneralError
        }
    }
}

fn render(shell: Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, name, &mut buf);
    buf
}
