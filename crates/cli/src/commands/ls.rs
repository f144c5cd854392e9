//! ls command - List buckets and objects
//!
//! Lists buckets when given an alias only, or lists objects when given a bucket path.

use clap::Args;
use serde::Serialize;
use stowage_core::{ListOptions, ObjectInfo, ObjectStore, RemotePath, Result};

use super::connect;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Keys requested per listing page
const PAGE_SIZE: u32 = 1000;

/// List buckets or objects
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote path (alias/ or alias/bucket[/prefix])
    pub path: String,

    /// List recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Summarize output (show totals only)
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ObjectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_objects: usize,
    total_size_bytes: i64,
    total_size_human: String,
}

impl Summary {
    fn of(items: &[ObjectInfo]) -> Self {
        let total_size: i64 = items.iter().filter_map(|i| i.size_bytes).sum();
        Self {
            total_objects: items.iter().filter(|i| !i.is_dir).count(),
            total_size_bytes: total_size,
            total_size_human: humansize::format_size(total_size.max(0) as u64, humansize::BINARY),
        }
    }
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (alias_name, bucket, prefix) = match parse_ls_path(&args.path) {
        Ok(parsed) => parsed,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };

    let client = match connect(&alias_name, &formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let items = match &bucket {
        None => client.list_buckets().await,
        Some(bucket) => {
            let path = RemotePath::new(&alias_name, bucket, prefix.unwrap_or_default());
            list_all(&client, &path, args.recursive).await
        }
    };

    match items {
        Ok(items) => {
            print_items(&items, args.summarize, bucket.is_none(), &formatter);
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to list {}", args.path), &e),
    }
}

/// List every object under a path, following markers until the listing is complete
async fn list_all(store: &dyn ObjectStore, path: &RemotePath, recursive: bool) -> Result<Vec<ObjectInfo>> {
    let mut items = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let options = ListOptions {
            recursive,
            max_keys: Some(PAGE_SIZE),
            marker: marker.take(),
            ..Default::default()
        };
        let page = store.list_objects(path, options).await?;
        items.extend(page.items);

        match page.next_marker {
            Some(next) if page.truncated => marker = Some(next),
            _ => break,
        }
    }
    Ok(items)
}

fn print_items(items: &[ObjectInfo], summarize: bool, buckets: bool, formatter: &Formatter) {
    if formatter.is_json() {
        formatter.json(&LsOutput {
            items: items.to_vec(),
            summary: summarize.then(|| Summary::of(items)),
        });
        return;
    }

    for item in items {
        let date = item
            .last_modified
            .map(|d| d.strftime("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "                   ".to_string());

        if buckets {
            formatter.println(&format!("[{date}]     0B {}/", item.key));
        } else if item.is_dir {
            formatter.println(&format!("[{date}]     0B {}", item.key));
        } else {
            let size = item.size_human.clone().unwrap_or_else(|| "0 B".to_string());
            formatter.println(&format!("[{date}] {size:>6} {}", item.key));
        }
    }

    if summarize {
        if buckets {
            formatter.println(&format!("\nTotal: {} buckets", items.len()));
        } else {
            let summary = Summary::of(items);
            formatter.println(&format!(
                "\nTotal: {} objects, {}",
                summary.total_objects, summary.total_size_human
            ));
        }
    }
}

/// Parse ls path into (alias, bucket, prefix)
fn parse_ls_path(path: &str) -> std::result::Result<(String, Option<String>, Option<String>), String> {
    let path = path.trim_end_matches('/');

    if path.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    let parts: Vec<&str> = path.splitn(3, '/').collect();

    match parts.as_slice() {
        [alias] => Ok((alias.to_string(), None, None)),
        [alias, bucket] => Ok((alias.to_string(), Some(bucket.to_string()), None)),
        [alias, bucket, prefix] => Ok((
            alias.to_string(),
            Some(bucket.to_string()),
            Some(format!("{prefix}/")),
        )),
        _ => Err(format!("Invalid path format: {path}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::MemoryStore;

    #[test]
    fn test_parse_ls_path_alias_only() {
        let (alias, bucket, prefix) = parse_ls_path("myalias").unwrap();
        assert_eq!(alias, "myalias");
        assert!(bucket.is_none());
        assert!(prefix.is_none());
    }

    #[test]
    fn test_parse_ls_path_with_prefix() {
        let (alias, bucket, prefix) = parse_ls_path("myalias/mybucket/path/to").unwrap();
        assert_eq!(alias, "myalias");
        assert_eq!(bucket, Some("mybucket".to_string()));
        assert_eq!(prefix, Some("path/to/".to_string()));
    }

    #[test]
    fn test_parse_ls_path_trailing_slash() {
        let (alias, bucket, prefix) = parse_ls_path("myalias/mybucket/").unwrap();
        assert_eq!(alias, "myalias");
        assert_eq!(bucket, Some("mybucket".to_string()));
        assert!(prefix.is_none());
    }

    #[test]
    fn test_parse_ls_path_empty() {
        assert!(parse_ls_path("").is_err());
        assert!(parse_ls_path("/").is_err());
    }

    #[tokio::test]
    async fn test_list_all_follows_markers() {
        let store = MemoryStore::with_objects(&[("a", "1"), ("b", "22"), ("c", "333")]).page_size(2);
        let path = RemotePath::new("s3", "bucket", "");

        let items = list_all(&store, &path, true).await.unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(store.markers(), [None, Some("b".to_string())]);
    }

    #[test]
    fn test_summary() {
        let items = vec![
            ObjectInfo::dir("photos/"),
            ObjectInfo::file("a.txt", 1024),
            ObjectInfo::file("b.txt", 1024),
        ];
        let summary = Summary::of(&items);
        assert_eq!(summary.total_objects, 2);
        assert_eq!(summary.total_size_bytes, 2048);
        assert_eq!(summary.total_size_human, "2 KiB");
    }
}
