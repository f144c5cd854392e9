//! Integration tests for the stow CLI
//!
//! These tests need a reachable S3-compatible endpoint that accepts
//! signature V2 requests.
//!
//! Run with:
//! ```bash
//! export TEST_S3_ENDPOINT=http://localhost:9000
//! export TEST_S3_ACCESS_KEY=accesskey
//! export TEST_S3_SECRET_KEY=secretkey
//! cargo test -p stowage-cli --features integration
//! ```

#![cfg(feature = "integration")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use tempfile::TempDir;

fn stow_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_stow"))
}

/// Run stow against an isolated config directory
fn run_stow(args: &[&str], config_dir: &Path) -> Output {
    Command::new(stow_binary())
        .args(args)
        .env("STOWAGE_CONFIG_DIR", config_dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute stow command")
}

/// Run stow with data on stdin
fn run_stow_with_stdin(args: &[&str], config_dir: &Path, stdin: &[u8]) -> Output {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new(stow_binary())
        .args(args)
        .env("STOWAGE_CONFIG_DIR", config_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn stow");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin)
        .expect("Failed to write stdin");
    child.wait_with_output().expect("Failed to wait for stow")
}

fn get_test_config() -> Option<(String, String, String)> {
    let endpoint = std::env::var("TEST_S3_ENDPOINT").ok()?;
    let access_key = std::env::var("TEST_S3_ACCESS_KEY").ok()?;
    let secret_key = std::env::var("TEST_S3_SECRET_KEY").ok()?;
    Some((endpoint, access_key, secret_key))
}

fn unique_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:x}", nanos % 0xffff_ffff)
}

fn wait_for_service(config_dir: &Path) -> bool {
    for _ in 0..30 {
        if run_stow(&["ls", "test/", "--json"], config_dir).status.success() {
            return true;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    false
}

/// Configure the `test` alias and create a fresh bucket
fn setup_with_bucket(name: &str) -> Option<(TempDir, String)> {
    let (endpoint, access_key, secret_key) = get_test_config()?;
    let config_dir = tempfile::tempdir().ok()?;
    let bucket = format!("stow-{name}-{}", unique_suffix());

    let output = run_stow(
        &[
            "alias",
            "set",
            "test",
            &endpoint,
            &access_key,
            &secret_key,
            "--bucket-lookup",
            "path",
        ],
        config_dir.path(),
    );
    if !output.status.success() {
        eprintln!("Failed to set alias: {}", String::from_utf8_lossy(&output.stderr));
        return None;
    }
    if !wait_for_service(config_dir.path()) {
        eprintln!("Service did not become ready in time");
        return None;
    }

    let output = run_stow(&["mb", &format!("test/{bucket}")], config_dir.path());
    if !output.status.success() {
        eprintln!("Failed to create bucket: {}", String::from_utf8_lossy(&output.stderr));
        return None;
    }
    Some((config_dir, bucket))
}

fn cleanup_bucket(config_dir: &Path, bucket: &str) {
    let _ = run_stow(&["rb", "--force", &format!("test/{bucket}")], config_dir);
}

fn json_stdout(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_upload_stat_cat_and_remove() {
    let Some((config_dir, bucket)) = setup_with_bucket("roundtrip") else {
        eprintln!("Skipping: TEST_S3_* not set or service unavailable");
        return;
    };
    let dir = config_dir.path();

    let local = dir.join("hello.txt");
    std::fs::write(&local, "hello from stow\n").unwrap();
    let object = format!("test/{bucket}/greetings/hello.txt");

    let output = run_stow(
        &["cp", local.to_str().unwrap(), &object, "--meta", "color=blue", "--json"],
        dir,
    );
    assert!(output.status.success(), "cp failed: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json_stdout(&output)["size_bytes"], 16);

    let output = run_stow(&["stat", &object, "--json"], dir);
    assert!(output.status.success());
    let stat = json_stdout(&output);
    assert_eq!(stat["content_type"], "text/plain");
    assert_eq!(stat["metadata"]["color"], "blue");
    assert_eq!(stat["etag"].as_str().map(str::len), Some(32));

    let output = run_stow(&["cat", &object], dir);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"hello from stow\n");

    let output = run_stow(&["cat", &object, "--offset", "6", "--length", "4"], dir);
    assert_eq!(output.stdout, b"from");

    let output = run_stow(&["rm", &object], dir);
    assert!(output.status.success());

    let output = run_stow(&["stat", &object], dir);
    assert_eq!(output.status.code(), Some(5));

    cleanup_bucket(dir, &bucket);
}

#[test]
fn test_pipe_and_download() {
    let Some((config_dir, bucket)) = setup_with_bucket("pipe") else {
        eprintln!("Skipping: TEST_S3_* not set or service unavailable");
        return;
    };
    let dir = config_dir.path();
    let object = format!("test/{bucket}/piped.log");

    let output = run_stow_with_stdin(&["pipe", &object], dir, b"line one\nline two\n");
    assert!(output.status.success(), "pipe failed: {}", String::from_utf8_lossy(&output.stderr));

    let target = dir.join("download");
    std::fs::create_dir_all(&target).unwrap();
    let output = run_stow(&["cp", &object, target.to_str().unwrap()], dir);
    assert!(output.status.success());
    assert_eq!(std::fs::read(target.join("piped.log")).unwrap(), b"line one\nline two\n");

    cleanup_bucket(dir, &bucket);
}

#[test]
fn test_recursive_copy_and_list() {
    let Some((config_dir, bucket)) = setup_with_bucket("recursive") else {
        eprintln!("Skipping: TEST_S3_* not set or service unavailable");
        return;
    };
    let dir = config_dir.path();

    let src = dir.join("tree");
    std::fs::create_dir_all(src.join("sub")).unwrap();
    std::fs::write(src.join("a.txt"), "a").unwrap();
    std::fs::write(src.join("sub/b.txt"), "bb").unwrap();

    let output = run_stow(
        &["cp", "-r", src.to_str().unwrap(), &format!("test/{bucket}/tree/")],
        dir,
    );
    assert!(output.status.success(), "cp -r failed: {}", String::from_utf8_lossy(&output.stderr));

    let output = run_stow(&["ls", "-r", "--summarize", &format!("test/{bucket}"), "--json"], dir);
    assert!(output.status.success());
    let listing = json_stdout(&output);
    assert_eq!(listing["summary"]["total_objects"], 2);
    assert_eq!(listing["summary"]["total_size_bytes"], 3);

    let output = run_stow(&["ls", &format!("test/{bucket}"), "--json"], dir);
    let listing = json_stdout(&output);
    let items = listing["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["key"], "tree/");

    let output = run_stow(&["rb", &format!("test/{bucket}")], dir);
    assert_eq!(output.status.code(), Some(6), "non-empty bucket must not be removed");

    cleanup_bucket(dir, &bucket);
}

#[test]
fn test_server_side_copy() {
    let Some((config_dir, bucket)) = setup_with_bucket("copy") else {
        eprintln!("Skipping: TEST_S3_* not set or service unavailable");
        return;
    };
    let dir = config_dir.path();
    let src = format!("test/{bucket}/original.json");
    let dst = format!("test/{bucket}/copies/");

    let output = run_stow_with_stdin(&["pipe", &src, "--content-type", "application/json"], dir, b"{}");
    assert!(output.status.success());

    let output = run_stow(&["cp", &src, &dst], dir);
    assert!(output.status.success(), "copy failed: {}", String::from_utf8_lossy(&output.stderr));

    let output = run_stow(&["stat", &format!("{dst}original.json"), "--json"], dir);
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["content_type"], "application/json");

    cleanup_bucket(dir, &bucket);
}

#[test]
fn test_share_url() {
    let Some((config_dir, bucket)) = setup_with_bucket("share") else {
        eprintln!("Skipping: TEST_S3_* not set or service unavailable");
        return;
    };
    let dir = config_dir.path();
    let object = format!("test/{bucket}/shared.txt");

    let output = run_stow(&["share", &object, "--expire", "10m", "--json"], dir);
    assert!(output.status.success());
    let share = json_stdout(&output);
    let url = share["url"].as_str().unwrap();
    assert!(url.contains("Signature="));
    assert!(url.contains("Expires="));
    assert_eq!(share["method"], "GET");

    cleanup_bucket(dir, &bucket);
}

#[test]
fn test_usage_errors() {
    let config_dir = tempfile::tempdir().unwrap();
    let dir = config_dir.path();

    let output = run_stow(&["cat", "missing-alias/bucket/key"], dir);
    assert_eq!(output.status.code(), Some(5));

    let output = run_stow(&["cp", "./a.txt", "./b.txt"], dir);
    assert_eq!(output.status.code(), Some(2));

    let output = run_stow(&["share", "x/bucket/key", "--expire", "30d"], dir);
    assert_eq!(output.status.code(), Some(2));
}
