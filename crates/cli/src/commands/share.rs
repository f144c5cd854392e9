//! share command - Generate a presigned URL
//!
//! The URL carries the signature and expiry in its query string, so anyone
//! holding it can GET (or PUT, with `--upload`) the object until it expires.
//! No request is sent to the service.

use clap::Args;
use jiff::{SignedDuration, Timestamp};
use serde::Serialize;

use super::{connect, object_arg};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Longest expiry accepted
const MAX_EXPIRY: SignedDuration = SignedDuration::from_hours(7 * 24);

/// Generate a presigned URL for an object
#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Object path (alias/bucket/key)
    pub path: String,

    /// How long the URL stays valid, e.g. 90s, 30m, 12h, 7d
    #[arg(long, default_value = "1h", value_parser = parse_expiry)]
    pub expire: SignedDuration,

    /// Create an upload (PUT) URL instead of a download URL
    #[arg(long)]
    pub upload: bool,
}

#[derive(Debug, Serialize)]
struct ShareOutput {
    url: String,
    method: &'static str,
    expires: Timestamp,
}

/// Execute the share command
pub fn execute(args: ShareArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match object_arg(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let client = match connect(&path.alias, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let expires = match Timestamp::now().checked_add(args.expire) {
        Ok(t) => t,
        Err(e) => {
            formatter.error(&format!("Invalid expiry: {e}"));
            return ExitCode::UsageError;
        }
    };

    let (method, url) = if args.upload {
        ("PUT", client.presign_put(&path, expires))
    } else {
        ("GET", client.presign_get(&path, expires))
    };

    match url {
        Ok(url) => {
            if formatter.is_json() {
                formatter.json(&ShareOutput { url, method, expires });
            } else {
                formatter.println(&format!("URL     : {url}"));
                formatter.println(&format!("Method  : {method}"));
                formatter.println(&format!("Expires : {expires}"));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to sign URL for {path}"), &e),
    }
}

/// Parse an expiry such as `90s`, `30m`, `12h` or `7d`; bare numbers are seconds
fn parse_expiry(value: &str) -> Result<SignedDuration, String> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let n: i64 = number
        .parse()
        .map_err(|_| format!("invalid expiry '{value}', expected e.g. 30m, 12h or 7d"))?;

    let unit_secs = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => return Err(format!("unknown expiry unit '{other}', use s, m, h or d")),
    };
    let secs = n
        .checked_mul(unit_secs)
        .ok_or_else(|| "expiry cannot exceed 7 days".to_string())?;
    let duration = SignedDuration::from_secs(secs);
    if duration.is_zero() {
        return Err("expiry must be greater than zero".to_string());
    }
    if duration > MAX_EXPIRY {
        return Err("expiry cannot exceed 7 days".to_string());
    }
    Ok(duration)
}
