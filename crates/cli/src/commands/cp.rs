//! cp command - Copy objects
//!
//! Copies between the local filesystem and a service, or between two remote
//! locations. Uploads larger than the part size go through resumable
//! multipart uploads; smaller files are sent in one verified PUT.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use stowage_core::{
    CannedAcl, ConfigManager, Error, GetOptions, ListOptions, ObjectInfo, ObjectSource,
    ObjectStore, ParsedPath, ProgressFn, PutOptions, RemotePath, Result, parse_path,
};
use stowage_rest::multipart::DEFAULT_PART_SIZE;
use stowage_rest::{MultipartConfig, StorageClient, upload_file};
use tokio::io::AsyncWriteExt;

use super::connect;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, ProgressBar};

/// Copy objects
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source path (local path or alias/bucket/key)
    pub source: String,

    /// Destination path (local path or alias/bucket/key)
    pub target: String,

    /// Copy recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Continue on errors
    #[arg(long)]
    pub continue_on_error: bool,

    /// Only show what would be copied (dry run)
    #[arg(long)]
    pub dry_run: bool,

    /// Storage class for uploaded objects
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Content type for uploaded files (guessed from the file name by default)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL for uploaded objects
    #[arg(long)]
    pub acl: Option<CannedAcl>,

    /// User metadata as KEY=VALUE, may be repeated
    #[arg(long = "meta", value_parser = parse_meta)]
    pub metadata: Vec<(String, String)>,

    /// Files larger than this many MiB upload in parts
    #[arg(long, default_value_t = DEFAULT_PART_SIZE / (1024 * 1024))]
    pub part_size_mib: u64,

    /// Parts uploaded at once
    #[arg(long, default_value_t = 4)]
    pub parallel: usize,
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_human: Option<String>,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config.clone());

    let source = match parse_path(&args.source) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid source path", &e),
    };
    let target = match parse_path(&args.target) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid target path", &e),
    };

    let copier = Copier {
        args: &args,
        formatter: &formatter,
        output_config: &output_config,
    };

    match (&source, &target) {
        (ParsedPath::Local(src), ParsedPath::Remote(dst)) => copier.upload(src, dst).await,
        (ParsedPath::Remote(src), ParsedPath::Local(dst)) => copier.download(src, dst).await,
        (ParsedPath::Remote(src), ParsedPath::Remote(dst)) => copier.copy_remote(src, dst).await,
        (ParsedPath::Local(_), ParsedPath::Local(_)) => {
            formatter.error("Cannot copy between two local paths. Use the system cp command.");
            ExitCode::UsageError
        }
    }
}

/// Shared state for one cp invocation
struct Copier<'a> {
    args: &'a CpArgs,
    formatter: &'a Formatter,
    output_config: &'a OutputConfig,
}

impl Copier<'_> {
    async fn upload(&self, src: &Path, dst: &RemotePath) -> ExitCode {
        let formatter = self.formatter;
        if !src.exists() {
            formatter.error(&format!("Source not found: {}", src.display()));
            return ExitCode::NotFound;
        }
        if src.is_dir() && !self.args.recursive {
            formatter.error("Source is a directory. Use -r/--recursive to copy directories.");
            return ExitCode::UsageError;
        }

        let plan = match upload_plan(src, dst) {
            Ok(p) => p,
            Err(e) => return formatter.fail("Failed to read source", &e),
        };

        let client = match connect(&dst.alias, formatter) {
            Ok(c) => c,
            Err(code) => return code,
        };

        let client = &client;
        self.run_plan(plan, move |file, target| self.upload_one(client, file, target)).await
    }

    async fn upload_one(&self, client: &StorageClient, file: PathBuf, target: RemotePath) -> ExitCode {
        let src_display = file.display().to_string();
        if self.args.dry_run {
            self.formatter.println(&format!("Would copy: {src_display} -> {target}"));
            return ExitCode::Success;
        }

        let size = match tokio::fs::metadata(&file).await {
            Ok(m) => m.len(),
            Err(e) => return self.formatter.fail(&format!("Failed to read {src_display}"), &Error::Io(e)),
        };

        let progress = ProgressBar::new(self.output_config, size);
        let options = PutOptions {
            content_type: self.content_type_for(&file),
            acl: self.args.acl,
            storage_class: self.args.storage_class.clone(),
            metadata: self.args.metadata.iter().cloned().collect::<BTreeMap<_, _>>(),
            progress: progress.callback(),
            ..Default::default()
        };

        let part_size = self.args.part_size_mib.saturating_mul(1024 * 1024);
        let result = if size > part_size {
            let mut config = MultipartConfig::new()
                .part_size(part_size)
                .concurrency(self.args.parallel);
            if let Some(dir) = upload_state_dir() {
                config = config.state_dir(dir);
            }
            upload_file(client, &target, &file, options, &config).await
        } else {
            put_file(client, &file, &target, options).await
        };
        progress.finish_and_clear();

        match result {
            Ok(info) => {
                self.report(src_display, target.to_full_path(), info.size_bytes.or(Some(size as i64)));
                ExitCode::Success
            }
            Err(e) => self.formatter.fail(&format!("Failed to upload {src_display}"), &e),
        }
    }

    fn content_type_for(&self, file: &Path) -> Option<String> {
        self.args.content_type.clone().or_else(|| {
            mime_guess::from_path(file)
                .first()
                .map(|m| m.essence_str().to_string())
        })
    }

    async fn download(&self, src: &RemotePath, dst: &Path) -> ExitCode {
        let client = match connect(&src.alias, self.formatter) {
            Ok(c) => c,
            Err(code) => return code,
        };

        let plan = if src.is_dir || self.args.recursive {
            match download_plan(&client, src, dst).await {
                Ok(p) => p,
                Err(e) => return self.formatter.fail(&format!("Failed to list {src}"), &e),
            }
        } else {
            vec![(src.clone(), download_target(src, dst))]
        };

        let client = &client;
        self.run_plan(plan, move |object, file| self.download_one(client, object, file)).await
    }

    async fn download_one(&self, client: &StorageClient, object: RemotePath, file: PathBuf) -> ExitCode {
        let dst_display = file.display().to_string();
        if self.args.dry_run {
            self.formatter.println(&format!("Would copy: {object} -> {dst_display}"));
            return ExitCode::Success;
        }

        let result = download_object(client, &object, &file, self.output_config).await;
        match result {
            Ok(written) => {
                self.report(object.to_full_path(), dst_display, Some(written as i64));
                ExitCode::Success
            }
            Err(e) => self.formatter.fail(&format!("Failed to download {object}"), &e),
        }
    }

    async fn copy_remote(&self, src: &RemotePath, dst: &RemotePath) -> ExitCode {
        if src.is_dir {
            self.formatter.error("Remote-to-remote copy takes a single object as source");
            return ExitCode::UsageError;
        }
        let dst = if dst.is_dir {
            dst.join(src.file_name().unwrap_or(&src.key))
        } else {
            dst.clone()
        };
        if self.args.dry_run {
            self.formatter.println(&format!("Would copy: {src} -> {dst}"));
            return ExitCode::Success;
        }

        let src_client = match connect(&src.alias, self.formatter) {
            Ok(c) => c,
            Err(code) => return code,
        };

        // Within one alias the service copies without the data passing through us
        let result = if src.alias == dst.alias {
            src_client.copy_object(src, &dst).await
        } else {
            match connect(&dst.alias, self.formatter) {
                Ok(dst_client) => stream_between(&src_client, src, &dst_client, &dst).await,
                Err(code) => return code,
            }
        };

        match result {
            Ok(info) => {
                self.report(src.to_full_path(), dst.to_full_path(), info.size_bytes);
                ExitCode::Success
            }
            Err(e) => self.formatter.fail(&format!("Failed to copy {src}"), &e),
        }
    }

    /// Run each (source, target) pair, stopping at the first failure unless
    /// `--continue-on-error` is set
    async fn run_plan<S, T, F, Fut>(&self, plan: Vec<(S, T)>, mut run: F) -> ExitCode
    where
        F: FnMut(S, T) -> Fut,
        Fut: std::future::Future<Output = ExitCode>,
    {
        let single = plan.len() == 1;
        let mut succeeded = 0;
        let mut failed = 0;
        let mut last_failure = ExitCode::Success;

        for (source, target) in plan {
            let code = run(source, target).await;
            if code == ExitCode::Success {
                succeeded += 1;
                continue;
            }
            failed += 1;
            last_failure = code;
            if !self.args.continue_on_error {
                return code;
            }
        }

        if failed > 0 {
            self.formatter.warning(&format!(
                "Completed with errors: {succeeded} succeeded, {failed} failed"
            ));
            last_failure
        } else {
            if succeeded == 0 {
                self.formatter.warning("Nothing to copy.");
            } else if !single && !self.formatter.is_json() {
                self.formatter.success(&format!("Copied {succeeded} file(s)."));
            }
            ExitCode::Success
        }
    }

    fn report(&self, source: String, target: String, size: Option<i64>) {
        let size_human = size.map(|s| humansize::format_size(s.max(0) as u64, humansize::BINARY));
        if self.formatter.is_json() {
            self.formatter.json(&CpOutput {
                status: "success",
                source,
                target,
                size_bytes: size,
                size_human,
            });
        } else {
            self.formatter.println(&format!(
                "{source} -> {target} ({})",
                size_human.unwrap_or_default()
            ));
        }
    }
}

/// Directory for multipart resume state, next to the config file
fn upload_state_dir() -> Option<PathBuf> {
    let manager = ConfigManager::new().ok()?;
    manager.config_path().parent().map(|dir| dir.join("uploads"))
}

/// Parse a `KEY=VALUE` metadata argument
fn parse_meta(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("invalid metadata '{value}', expected KEY=VALUE")),
    }
}

/// Destination object for a local file
///
/// A destination ending in `/` (or a bare bucket) receives the file under
/// its own name.
fn upload_target(file: &Path, dst: &RemotePath) -> RemotePath {
    if dst.is_dir {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dst.join(&name)
    } else {
        dst.clone()
    }
}

/// Files to upload and the object each one becomes
fn upload_plan(src: &Path, dst: &RemotePath) -> Result<Vec<(PathBuf, RemotePath)>> {
    if src.is_file() {
        return Ok(vec![(src.to_path_buf(), upload_target(src, dst))]);
    }

    fn walk(dir: &Path, base: &Path, out: &mut Vec<(PathBuf, String)>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, base, out)?;
            } else if path.is_file() {
                let relative = path.strip_prefix(base).unwrap_or(&path);
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((path, key));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(src, src, &mut files)?;
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files.into_iter().map(|(path, key)| (path, dst.join(&key))).collect())
}

/// Local file for a downloaded object
fn download_target(src: &RemotePath, dst: &Path) -> PathBuf {
    let names_dir = dst.to_string_lossy().ends_with(['/', std::path::MAIN_SEPARATOR]);
    if names_dir || dst.is_dir() {
        dst.join(src.file_name().unwrap_or(&src.key))
    } else {
        dst.to_path_buf()
    }
}

/// Objects under a prefix and the local file each one becomes
async fn download_plan(store: &dyn ObjectStore, src: &RemotePath, dst: &Path) -> Result<Vec<(RemotePath, PathBuf)>> {
    let base = RemotePath::new(&src.alias, &src.bucket, "");
    let mut plan = Vec::new();
    let mut marker = None;
    loop {
        let options = ListOptions {
            recursive: true,
            max_keys: Some(1000),
            marker: marker.take(),
            ..Default::default()
        };
        let page = store.list_objects(src, options).await?;
        for item in page.items.iter().filter(|i| !i.is_dir) {
            let relative = item.key.strip_prefix(&src.key).unwrap_or(&item.key);
            let file = relative
                .split('/')
                .filter(|part| !part.is_empty() && *part != "." && *part != "..")
                .fold(dst.to_path_buf(), |path, part| path.join(part));
            plan.push((base.join(&item.key), file));
        }
        match page.next_marker {
            Some(next) if page.truncated => marker = Some(next),
            _ => break,
        }
    }
    Ok(plan)
}

/// Upload one local file in a single PUT
async fn put_file(store: &dyn ObjectStore, file: &Path, target: &RemotePath, options: PutOptions) -> Result<ObjectInfo> {
    store
        .put_object(target, ObjectSource::File(file.to_path_buf()), options)
        .await
}

/// Stream an object into a local file, returning the bytes written
///
/// The file is written under a temporary name and renamed into place once
/// complete, so a failed download never leaves a truncated file behind.
async fn download_object(store: &dyn ObjectStore, object: &RemotePath, file: &Path, output_config: &OutputConfig) -> Result<u64> {
    let mut data = store.get_object(object, GetOptions::default()).await?;
    let total = data.info.size_bytes.unwrap_or(0).max(0) as u64;
    let progress = ProgressBar::new(output_config, total);

    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(file);

    let result: Result<u64> = async {
        let mut out = tokio::fs::File::create(&partial).await?;
        let mut reader = ProgressReader {
            inner: &mut data.reader,
            read: 0,
            progress: progress.callback(),
        };
        let written = tokio::io::copy(&mut reader, &mut out).await?;
        out.flush().await?;
        Ok(written)
    }
    .await;
    progress.finish_and_clear();

    match result {
        Ok(written) => {
            tokio::fs::rename(&partial, file).await?;
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

fn partial_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Copy an object between two aliases by streaming it through this process
async fn stream_between(
    src_store: &dyn ObjectStore,
    src: &RemotePath,
    dst_store: &dyn ObjectStore,
    dst: &RemotePath,
) -> Result<ObjectInfo> {
    let data = src_store.get_object(src, GetOptions::default()).await?;
    let options = PutOptions {
        content_type: data.info.content_type.clone(),
        storage_class: data.info.storage_class.clone(),
        metadata: data.info.metadata.clone(),
        ..Default::default()
    };
    let source = ObjectSource::Reader {
        length: data.info.size_bytes.map(|s| s.max(0) as u64),
        reader: data.reader,
    };
    dst_store.put_object(dst, source, options).await
}

/// Reader adapter reporting the running byte count
struct ProgressReader<'a, R> {
    inner: &'a mut R,
    read: u64,
    progress: Option<ProgressFn>,
}

impl<R: tokio::io::AsyncRead + Unpin> tokio::io::AsyncRead for ProgressReader<'_, R> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = std::pin::Pin::new(&mut *self.inner).poll_read(cx, buf);
        if let std::task::Poll::Ready(Ok(())) = &poll {
            let n = (buf.filled().len() - before) as u64;
            self.read += n;
            if let Some(progress) = &self.progress {
                progress(self.read);
            }
        }
        poll
    }
}
