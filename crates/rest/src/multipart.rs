//! Multipart upload support
//!
//! Large files are split into parts that upload concurrently. Progress is
//! recorded in a JSON state file so an interrupted upload can resume.

use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::Method;
use stowage_core::{Error, ObjectInfo, ProgressFn, PutOptions, RemotePath, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::body::RepeatableBody;
use crate::client::{Query, StorageClient};
use crate::metadata::{unquote_etag, verify_etag};
use crate::throttle;
use crate::xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
    ListPartsResult, PartEntry, from_xml, to_xml,
};

pub use crate::xml::CompletedPart;

/// Default part size: 64 MiB
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum part size: 5 MiB
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one upload
pub const MAX_PARTS: usize = 10_000;

/// Multipart upload configuration
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,

    /// Number of parts in flight at once
    pub concurrency: usize,

    /// Directory for resume state files
    pub state_dir: Option<PathBuf>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: 4,
            state_dir: None,
        }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_size(mut self, size: u64) -> Self {
        self.part_size = size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(path.into());
        self
    }

    /// Part size for a file, grown when needed to stay within the part limit
    pub fn calculate_part_size(&self, file_size: u64) -> u64 {
        if file_size <= MIN_PART_SIZE {
            return MIN_PART_SIZE;
        }

        let parts = file_size.div_ceil(self.part_size);
        if parts <= MAX_PARTS as u64 {
            self.part_size
        } else {
            let required_size = file_size.div_ceil(MAX_PARTS as u64);
            required_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE)
        }
    }
}

/// An upload started on the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// Persisted progress of a multipart upload
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UploadState {
    pub upload_id: String,

    /// Remote target as `alias/bucket/key`
    pub target: String,

    /// Local source file
    pub source: Option<String>,

    pub total_size: u64,

    pub part_size: u64,

    pub completed_parts: Vec<CompletedPart>,

    pub last_updated: jiff::Timestamp,
}

impl UploadState {
    pub fn new(upload_id: impl Into<String>, target: impl Into<String>, total_size: u64, part_size: u64) -> Self {
        Self {
            upload_id: upload_id.into(),
            target: target.into(),
            source: None,
            total_size,
            part_size,
            completed_parts: Vec::new(),
            last_updated: jiff::Timestamp::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record a finished part, replacing any earlier record for it
    pub fn add_completed_part(&mut self, part_number: u32, etag: String) {
        self.completed_parts.retain(|p| p.part_number != part_number);
        self.completed_parts.push(CompletedPart { part_number, etag });
        self.last_updated = jiff::Timestamp::now();
    }

    /// Bytes covered by completed parts
    pub fn completed_bytes(&self) -> u64 {
        self.completed_parts
            .iter()
            .map(|p| {
                let (start, end) = part_byte_range(p.part_number, self.part_size, self.total_size);
                end - start
            })
            .sum()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        (self.completed_bytes() as f64 / self.total_size as f64 * 100.0).min(100.0)
    }

    pub fn state_file_path(state_dir: &Path, upload_id: &str) -> PathBuf {
        let safe_id: String = upload_id
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        state_dir.join(format!("upload_{safe_id}.json"))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = Self::state_file_path(state_dir, &self.upload_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(state_dir: &Path, upload_id: &str) -> Result<Self> {
        let path = Self::state_file_path(state_dir, upload_id);
        let content = std::fs::read_to_string(&path)?;
        let state: Self = serde_json::from_str(&content)?;
        state
            .validated()
            .ok_or_else(|| Error::General(format!("Invalid upload state in {}", path.display())))
    }

    /// Drop recorded parts that cannot belong to this upload
    ///
    /// State files can be edited by hand. Part numbers outside
    /// `1..=part count` are discarded, and a zero part size makes the whole
    /// state unusable.
    fn validated(mut self) -> Option<Self> {
        if self.part_size == 0 {
            return None;
        }
        let part_count = calculate_parts(self.total_size, self.part_size);
        let before = self.completed_parts.len();
        self.completed_parts
            .retain(|p| p.part_number >= 1 && p.part_number as usize <= part_count);
        let dropped = before - self.completed_parts.len();
        if dropped > 0 {
            tracing::warn!(upload_id = %self.upload_id, dropped, "Ignoring invalid parts in upload state");
        }
        Some(self)
    }

    pub fn delete(state_dir: &Path, upload_id: &str) -> Result<()> {
        let path = Self::state_file_path(state_dir, upload_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Unfinished uploads recorded for a target
    pub fn find_pending(state_dir: &Path, target: &str) -> Result<Vec<Self>> {
        let mut pending = Vec::new();
        if !state_dir.exists() {
            return Ok(pending);
        }

        for entry in std::fs::read_dir(state_dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<Self>(&content) {
                Ok(state) if state.target == target => match state.validated() {
                    Some(state) => pending.push(state),
                    None => tracing::debug!(path = %path.display(), "Skipping upload state with zero part size"),
                },
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.display(), "Skipping unreadable upload state: {e}"),
            }
        }
        Ok(pending)
    }
}

/// Number of parts for a file
pub fn calculate_parts(file_size: u64, part_size: u64) -> usize {
    file_size.div_ceil(part_size) as usize
}

/// Byte range `[start, end)` of a part
pub fn part_byte_range(part_number: u32, part_size: u64, total_size: u64) -> (u64, u64) {
    let start = u64::from(part_number).saturating_sub(1) * part_size;
    let end = (start + part_size).min(total_size);
    (start.min(total_size), end)
}

impl StorageClient {
    /// Start a multipart upload
    pub async fn initiate_multipart(&self, path: &RemotePath, options: &PutOptions) -> Result<MultipartUpload> {
        let mut request = self.request(Method::POST, Some(&path.bucket), Some(&path.key), &[("uploads", None)])?;
        self.upload_headers(&mut request.headers, options)?;

        let response = self.perform(request, &[200]).await?;
        let text = response.body.text().await?;
        let result: InitiateMultipartUploadResult = from_xml(&text)?;

        tracing::debug!(path = %path, upload_id = %result.upload_id, "Initiated multipart upload");
        Ok(MultipartUpload {
            bucket: path.bucket.clone(),
            key: path.key.clone(),
            upload_id: result.upload_id,
        })
    }

    /// Upload one part, checking the returned ETag against its MD5
    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
        progress: Option<ProgressFn>,
    ) -> Result<CompletedPart> {
        let body = RepeatableBody::from_bytes(data)
            .with_throttle(throttle::global())
            .with_progress(progress);
        let query: Query = vec![
            ("partNumber", Some(part_number.to_string())),
            ("uploadId", Some(upload.upload_id.clone())),
        ];
        let request = self
            .request(Method::PUT, Some(&upload.bucket), Some(&upload.key), &query)?
            .with_body(body.clone());

        let response = self.perform(request, &[200]).await?;
        let etag = response.header("etag").map(|e| unquote_etag(&e).to_string());
        if let Some(expected) = body.md5_hex() {
            verify_etag(&expected, etag.as_deref(), &upload.key, self.provider())?;
        }

        tracing::debug!(key = %upload.key, part_number, "Uploaded part");
        Ok(CompletedPart {
            part_number,
            etag: etag.unwrap_or_default(),
        })
    }

    /// Assemble uploaded parts into the final object
    pub async fn complete_multipart(&self, upload: &MultipartUpload, mut parts: Vec<CompletedPart>) -> Result<ObjectInfo> {
        parts.sort_by_key(|p| p.part_number);
        let document = CompleteMultipartUpload {
            parts: parts
                .into_iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: format!("\"{}\"", unquote_etag(&p.etag)),
                })
                .collect(),
        };
        let xml = to_xml(&document)?;

        let query: Query = vec![("uploadId", Some(upload.upload_id.clone()))];
        let request = self
            .request(Method::POST, Some(&upload.bucket), Some(&upload.key), &query)?
            .with_body(RepeatableBody::from_bytes(xml.into_bytes()));

        let response = self.perform(request, &[200]).await?;
        let text = self.result_document(response, "Complete multipart upload").await?;
        let result: CompleteMultipartUploadResult = from_xml(&text)?;

        let mut info = ObjectInfo {
            key: upload.key.clone(),
            ..ObjectInfo::default()
        };
        info.etag = result.etag.as_deref().map(|e| unquote_etag(e).to_string());
        info.last_modified = Some(jiff::Timestamp::now());
        tracing::info!(key = %upload.key, upload_id = %upload.upload_id, "Completed multipart upload");
        Ok(info)
    }

    /// Abandon an upload and discard its parts
    pub async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        let query: Query = vec![("uploadId", Some(upload.upload_id.clone()))];
        let request = self.request(Method::DELETE, Some(&upload.bucket), Some(&upload.key), &query)?;
        self.perform(request, &[204]).await?;
        tracing::info!(key = %upload.key, upload_id = %upload.upload_id, "Aborted multipart upload");
        Ok(())
    }

    /// Parts the service holds for an upload
    pub async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<PartEntry>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query: Query = vec![("uploadId", Some(upload.upload_id.clone()))];
            if let Some(m) = &marker {
                query.push(("part-number-marker", Some(m.clone())));
            }
            let request = self.request(Method::GET, Some(&upload.bucket), Some(&upload.key), &query)?;
            let response = self.perform(request, &[200]).await?;
            let text = response.body.text().await?;
            let page: ListPartsResult = from_xml(&text)?;

            parts.extend(page.parts);
            match page.next_part_number_marker.filter(|m| !m.is_empty()) {
                Some(next) if page.is_truncated => marker = Some(next),
                _ => break,
            }
        }
        Ok(parts)
    }
}

/// Spreads per-part progress into one running total
struct PartProgress {
    sink: Option<ProgressFn>,
    total: Arc<AtomicU64>,
}

impl PartProgress {
    fn new(sink: Option<ProgressFn>, already_done: u64) -> Self {
        Self {
            sink,
            total: Arc::new(AtomicU64::new(already_done)),
        }
    }

    fn for_part(&self) -> Option<ProgressFn> {
        let sink = self.sink.clone()?;
        let total = Arc::clone(&self.total);
        let last = AtomicU64::new(0);
        let report: ProgressFn = Arc::new(move |read: u64| {
            // A retried part restarts from zero
            let prev = last.swap(read, Ordering::SeqCst);
            let now = if read >= prev {
                total.fetch_add(read - prev, Ordering::SeqCst) + (read - prev)
            } else {
                total.fetch_sub(prev - read, Ordering::SeqCst) - (prev - read)
            };
            sink(now);
        });
        Some(report)
    }
}

async fn read_part(file: &Path, start: u64, len: u64) -> Result<Bytes> {
    let mut handle = tokio::fs::File::open(file).await?;
    handle.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; len as usize];
    handle.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Pick up a previous attempt at the same upload, if the service still has it
async fn resume_state(
    client: &StorageClient,
    state_dir: &Path,
    target: &str,
    source: &str,
    total_size: u64,
    part_size: u64,
    path: &RemotePath,
) -> Result<Option<UploadState>> {
    let candidates = UploadState::find_pending(state_dir, target)?;
    let Some(mut state) = candidates.into_iter().find(|s| {
        s.source.as_deref() == Some(source) && s.total_size == total_size && s.part_size == part_size
    }) else {
        return Ok(None);
    };

    let upload = MultipartUpload {
        bucket: path.bucket.clone(),
        key: path.key.clone(),
        upload_id: state.upload_id.clone(),
    };
    let remote = match client.list_parts(&upload).await {
        Ok(parts) => parts,
        Err(e) if e.is_not_found() => {
            tracing::info!(upload_id = %state.upload_id, "Previous upload no longer exists, starting over");
            UploadState::delete(state_dir, &state.upload_id)?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    state.completed_parts.retain(|local| {
        remote
            .iter()
            .any(|r| r.part_number == local.part_number && unquote_etag(&r.etag) == unquote_etag(&local.etag))
    });
    tracing::info!(
        upload_id = %state.upload_id,
        parts = state.completed_parts.len(),
        "Resuming multipart upload"
    );
    Ok(Some(state))
}

/// Upload a local file in parts, resuming a recorded attempt when possible
pub async fn upload_file(
    client: &StorageClient,
    path: &RemotePath,
    file: &Path,
    options: PutOptions,
    config: &MultipartConfig,
) -> Result<ObjectInfo> {
    let total_size = tokio::fs::metadata(file).await?.len();
    let part_size = config.calculate_part_size(total_size);
    let part_count = calculate_parts(total_size, part_size).max(1) as u32;
    let target = path.to_full_path();
    let source = file.display().to_string();

    let resumed = match &config.state_dir {
        Some(dir) => resume_state(client, dir, &target, &source, total_size, part_size, path).await?,
        None => None,
    };
    let mut state = match resumed {
        Some(state) => state,
        None => {
            let upload = client.initiate_multipart(path, &options).await?;
            UploadState::new(upload.upload_id, &target, total_size, part_size).with_source(&source)
        }
    };
    if let Some(dir) = &config.state_dir {
        state.save(dir)?;
    }

    let upload = MultipartUpload {
        bucket: path.bucket.clone(),
        key: path.key.clone(),
        upload_id: state.upload_id.clone(),
    };

    let done: BTreeSet<u32> = state.completed_parts.iter().map(|p| p.part_number).collect();
    let pending: Vec<u32> = (1..=part_count).filter(|n| !done.contains(n)).collect();
    let progress = PartProgress::new(options.progress.clone(), state.completed_bytes());
    if let Some(sink) = &options.progress {
        sink(state.completed_bytes());
    }

    tracing::debug!(
        path = %path,
        part_size,
        parts = part_count,
        pending = pending.len(),
        "Uploading file in parts"
    );

    let upload_ref = &upload;
    let mut uploads = stream::iter(pending)
        .map(|part_number| {
            let part_progress = progress.for_part();
            async move {
                let (start, end) = part_byte_range(part_number, part_size, total_size);
                let data = read_part(file, start, end - start).await?;
                client.upload_part(upload_ref, part_number, data, part_progress).await
            }
        })
        .buffer_unordered(config.concurrency.max(1));

    let mut failure = None;
    while let Some(result) = uploads.next().await {
        match result {
            Ok(part) => {
                state.add_completed_part(part.part_number, part.etag);
                if let Some(dir) = &config.state_dir {
                    state.save(dir)?;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(uploads);

    if let Some(error) = failure {
        if config.state_dir.is_some() {
            tracing::warn!(upload_id = %upload.upload_id, "Part upload failed, state kept for resume");
        } else if let Err(abort_error) = client.abort_multipart(&upload).await {
            tracing::warn!(upload_id = %upload.upload_id, "Failed to abort multipart upload: {abort_error}");
        }
        return Err(error);
    }

    let mut info = client.complete_multipart(&upload, state.completed_parts.clone()).await?;
    if let Some(dir) = &config.state_dir {
        UploadState::delete(dir, &upload.upload_id)?;
    }
    info = info.with_size(total_size as i64);
    info.content_type = options.content_type.clone();
    info.metadata = options.metadata;
    Ok(info)
}
