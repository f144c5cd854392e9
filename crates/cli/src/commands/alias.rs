//! Alias management commands
//!
//! Aliases are named references to storage endpoints, including the
//! provider, connection details and credentials.

use clap::Subcommand;
use serde::Serialize;
use stowage_core::{Alias, AliasManager};
use stowage_rest::Provider;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Alias subcommands for managing storage service connections
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "s3", "gcs", "archive")
    pub name: String,

    /// Service endpoint (e.g., "s3.amazonaws.com", "https://storage.googleapis.com")
    pub endpoint: String,

    /// Access key ID; leave empty for anonymous access
    #[arg(default_value = "")]
    pub access_key: String,

    /// Secret access key
    #[arg(default_value = "")]
    pub secret_key: String,

    /// Service provider: s3 or gcs
    #[arg(long, default_value = "s3")]
    pub provider: String,

    /// Bucket lookup style: auto, path, or dns
    #[arg(long, default_value = "auto")]
    pub bucket_lookup: String,

    /// Allow insecure TLS connections
    #[arg(long, default_value = "false")]
    pub insecure: bool,
}

/// Arguments for the `alias list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details including provider and lookup style
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

/// JSON output for alias list
#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for JSON output (without credentials)
#[derive(Serialize)]
struct AliasInfo {
    name: String,
    endpoint: String,
    provider: String,
    bucket_lookup: String,
    anonymous: bool,
}

impl From<&Alias> for AliasInfo {
    fn from(alias: &Alias) -> Self {
        Self {
            name: alias.name.clone(),
            endpoint: alias.endpoint.clone(),
            provider: alias.provider.clone(),
            bucket_lookup: alias.bucket_lookup.clone(),
            anonymous: alias.credentials().is_none(),
        }
    }
}

/// JSON output for alias set/remove operations
#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let alias_manager = match AliasManager::new() {
        Ok(am) => am,
        Err(e) => return formatter.fail("Failed to load configuration", &e),
    };

    match cmd {
        AliasCommands::Set(args) => execute_set(args, &alias_manager, &formatter),
        AliasCommands::List(args) => execute_list(args, &alias_manager, &formatter),
        AliasCommands::Remove(args) => execute_remove(args, &alias_manager, &formatter),
    }
}

/// Check `alias set` arguments, returning a message for the first problem
fn validate_set_args(args: &SetArgs) -> Result<(), String> {
    if !stowage_core::path::is_valid_alias_name(&args.name) {
        return Err(format!(
            "Invalid alias name '{}': use letters, digits, '-' and '_'",
            args.name
        ));
    }
    if args.endpoint.is_empty() {
        return Err("Endpoint cannot be empty".to_string());
    }
    if let Err(e) = args.provider.parse::<Provider>() {
        return Err(e.to_string());
    }
    if !matches!(args.bucket_lookup.as_str(), "auto" | "path" | "dns") {
        return Err("Bucket lookup must be 'auto', 'path', or 'dns'".to_string());
    }
    if args.access_key.is_empty() != args.secret_key.is_empty() {
        return Err("Give both an access key and a secret key, or neither".to_string());
    }
    Ok(())
}

fn execute_set(args: SetArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    if let Err(msg) = validate_set_args(&args) {
        formatter.error(&msg);
        return ExitCode::UsageError;
    }

    let mut alias = Alias::new(
        &args.name,
        &args.endpoint,
        &args.access_key,
        &args.secret_key,
    );
    alias.provider = args.provider;
    alias.bucket_lookup = args.bucket_lookup;
    alias.insecure = args.insecure;

    match manager.set(alias) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' configured successfully", args.name),
                });
            } else {
                formatter.success(&format!("Alias '{}' configured successfully.", args.name));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail("Failed to save alias", &e),
    }
}

fn execute_list(args: ListArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    let aliases = match manager.list() {
        Ok(aliases) => aliases,
        Err(e) => return formatter.fail("Failed to list aliases", &e),
    };

    if formatter.is_json() {
        formatter.json(&AliasListOutput {
            aliases: aliases.iter().map(AliasInfo::from).collect(),
        });
    } else if aliases.is_empty() {
        formatter.println("No aliases configured.");
    } else {
        for alias in &aliases {
            if args.long {
                let access = if alias.credentials().is_some() { "signed" } else { "anonymous" };
                formatter.println(&format!(
                    "{:<12} {} (provider: {}, lookup: {}, {access})",
                    alias.name, alias.endpoint, alias.provider, alias.bucket_lookup
                ));
            } else {
                formatter.println(&format!("{:<12} {}", alias.name, alias.endpoint));
            }
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' removed successfully", args.name),
                });
            } else {
                formatter.success(&format!("Alias '{}' removed successfully.", args.name));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail("Failed to remove alias", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_args(name: &str) -> SetArgs {
        SetArgs {
            name: name.to_string(),
            endpoint: "s3.amazonaws.com".to_string(),
            access_key: "AKID".to_string(),
            secret_key: "secret".to_string(),
            provider: "s3".to_string(),
            bucket_lookup: "auto".to_string(),
            insecure: false,
        }
    }

    #[test]
    fn test_validate_set_args() {
        assert!(validate_set_args(&set_args("prod")).is_ok());
        assert!(validate_set_args(&set_args("bad name")).is_err());

        let mut args = set_args("prod");
        args.provider = "azure".to_string();
        assert!(validate_set_args(&args).is_err());

        let mut args = set_args("prod");
        args.bucket_lookup = "virtual".to_string();
        assert!(validate_set_args(&args).is_err());

        let mut args = set_args("prod");
        args.secret_key.clear();
        assert!(validate_set_args(&args).is_err());

        let mut args = set_args("public");
        args.access_key.clear();
        args.secret_key.clear();
        assert!(validate_set_args(&args).is_ok());
    }

    #[test]
    fn test_alias_info_hides_credentials() {
        let mut alias = Alias::new("gcs", "storage.googleapis.com", "GOOG", "secret");
        alias.provider = "gcs".to_string();
        let info = AliasInfo::from(&alias);

        assert_eq!(info.name, "gcs");
        assert_eq!(info.provider, "gcs");
        assert!(!info.anonymous);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("secret"));

        let anonymous = Alias::new("public", "s3.amazonaws.com", "", "");
        assert!(AliasInfo::from(&anonymous).anonymous);
    }

    #[test]
    fn test_set_and_remove_through_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = AliasManager::with_config_manager(stowage_core::ConfigManager::with_path(
            dir.path().join("config.toml"),
        ));
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });

        assert_eq!(execute_set(set_args("prod"), &manager, &formatter), ExitCode::Success);
        assert_eq!(manager.get("prod").unwrap().endpoint, "s3.amazonaws.com");

        let removed = execute_remove(RemoveArgs { name: "prod".to_string() }, &manager, &formatter);
        assert_eq!(removed, ExitCode::Success);

        let missing = execute_remove(RemoveArgs { name: "prod".to_string() }, &manager, &formatter);
        assert_eq!(missing, ExitCode::NotFound);
    }
}
