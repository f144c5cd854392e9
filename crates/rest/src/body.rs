//! Repeatable upload bodies
//!
//! A request may be sent several times before it succeeds, so its body has
//! to be readable from the first byte again on every attempt.
//! [`RepeatableBody`] is a cheap-clone handle over the upload source: the
//! executor keeps one handle and rewinds it before each attempt, the
//! transport streams from another, and the caller inspects the MD5 of what
//! was sent once the request completes.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use md5::{Digest, Md5};
use stowage_core::{ObjectSource, ProgressFn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};
use tokio::time::Sleep;

use crate::throttle::{Reservation, Throttle};

/// Largest chunk handed to the transport in one read
const READ_CHUNK: usize = 64 * 1024;

/// Failures specific to replaying an upload body
#[derive(Error, Debug)]
pub enum BodyError {
    /// A forward-only stream was read further than it can be replayed
    #[error(
        "Input stream is not repeatable: {read} bytes have been read, exceeding the {limit} byte replay buffer"
    )]
    ReplayBufferExceeded { read: u64, limit: usize },
}

impl From<BodyError> for io::Error {
    fn from(err: BodyError) -> Self {
        io::Error::other(err)
    }
}

/// Readers that can also seek back to where they started
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

enum SeekPhase {
    Idle,
    Flushing,
    Seeking,
}

enum Source {
    Memory {
        data: Bytes,
        pos: usize,
    },
    Seekable {
        reader: Box<dyn SeekableSource>,
        start: u64,
        phase: SeekPhase,
    },
    Buffered {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        buffer: Vec<u8>,
        limit: usize,
        replay_pos: Option<usize>,
        consumed: u64,
    },
}

/// Bytes granted by the throttle but not yet read, valid only in `second`
#[derive(Clone, Copy)]
struct Grant {
    second: u64,
    bytes: u64,
}

struct BodyState {
    source: Source,
    md5: Md5,
    digest: Option<[u8; 16]>,
    bytes_read: u64,
    content_length: Option<u64>,
    throttle: Option<Arc<Throttle>>,
    pending_wait: Option<Pin<Box<Sleep>>>,
    grant: Option<Grant>,
    progress: Option<ProgressFn>,
    scratch: Vec<u8>,
}

/// Upload body that can be rewound to its first byte
#[derive(Clone)]
pub struct RepeatableBody {
    inner: Arc<Mutex<BodyState>>,
}

impl std::fmt::Debug for RepeatableBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RepeatableBody")
            .field("content_length", &state.content_length)
            .field("bytes_read", &state.bytes_read)
            .field("repeatable", &state.is_repeatable())
            .finish()
    }
}

impl RepeatableBody {
    fn from_source(source: Source, content_length: Option<u64>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BodyState {
                source,
                md5: Md5::new(),
                digest: None,
                bytes_read: 0,
                content_length,
                throttle: None,
                pending_wait: None,
                grant: None,
                progress: None,
                scratch: Vec::new(),
            })),
        }
    }

    /// Body over in-memory content
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::from_source(Source::Memory { data, pos: 0 }, Some(len))
    }

    /// Body over a seekable reader, replayed from its current position
    pub async fn from_seekable<R>(mut reader: R, content_length: Option<u64>) -> io::Result<Self>
    where
        R: SeekableSource + 'static,
    {
        let start = reader.stream_position().await?;
        Ok(Self::from_source(
            Source::Seekable {
                reader: Box::new(reader),
                start,
                phase: SeekPhase::Idle,
            },
            content_length,
        ))
    }

    /// Body over a forward-only reader
    ///
    /// Up to `buffer_limit` bytes are kept so that an attempt which fails
    /// early can be replayed.
    pub fn from_reader<R>(reader: R, content_length: Option<u64>, buffer_limit: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::from_source(
            Source::Buffered {
                reader: Box::new(reader),
                buffer: Vec::new(),
                limit: buffer_limit,
                replay_pos: None,
                consumed: 0,
            },
            content_length,
        )
    }

    /// Build a body from an upload source
    ///
    /// Files are opened and replayed by seeking; arbitrary readers are
    /// buffered up to `buffer_limit` bytes.
    pub async fn from_object_source(source: ObjectSource, buffer_limit: usize) -> io::Result<Self> {
        match source {
            ObjectSource::Bytes(data) => Ok(Self::from_bytes(data)),
            ObjectSource::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let len = file.metadata().await?.len();
                Self::from_seekable(file, Some(len)).await
            }
            ObjectSource::Reader { reader, length } => {
                Ok(Self::from_reader(reader, length, buffer_limit))
            }
        }
    }

    /// Limit read speed with a shared throttle
    pub fn with_throttle(self, throttle: Option<Arc<Throttle>>) -> Self {
        self.lock().throttle = throttle;
        self
    }

    /// Report the bytes read since the last rewind
    pub fn with_progress(self, progress: Option<ProgressFn>) -> Self {
        self.lock().progress = progress;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BodyState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total length, when known up front
    pub fn content_length(&self) -> Option<u64> {
        self.lock().content_length
    }

    /// Bytes read since the last rewind
    pub fn bytes_read(&self) -> u64 {
        self.lock().bytes_read
    }

    /// Whether `rewind` would currently succeed
    pub fn is_repeatable(&self) -> bool {
        self.lock().is_repeatable()
    }

    /// MD5 of everything read since the last rewind, once the end is reached
    pub fn md5_digest(&self) -> Option<[u8; 16]> {
        self.lock().digest
    }

    /// Hex form of [`Self::md5_digest`]
    pub fn md5_hex(&self) -> Option<String> {
        self.md5_digest().map(hex::encode)
    }

    /// Reposition at the first byte and restart hashing and counting
    pub async fn rewind(&self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.lock().poll_rewind(cx)).await
    }
}

impl BodyState {
    fn is_repeatable(&self) -> bool {
        match &self.source {
            Source::Memory { .. } | Source::Seekable { .. } => true,
            Source::Buffered {
                buffer, consumed, ..
            } => *consumed == buffer.len() as u64,
        }
    }

    fn poll_rewind(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.source {
            Source::Memory { pos, .. } => *pos = 0,
            Source::Seekable {
                reader,
                start,
                phase,
            } => loop {
                match *phase {
                    SeekPhase::Idle => *phase = SeekPhase::Flushing,
                    SeekPhase::Flushing => {
                        // Settle any operation still in flight before seeking
                        if let Err(e) = ready!(Pin::new(&mut **reader).poll_complete(cx)) {
                            *phase = SeekPhase::Idle;
                            return Poll::Ready(Err(e));
                        }
                        if let Err(e) = Pin::new(&mut **reader).start_seek(SeekFrom::Start(*start))
                        {
                            *phase = SeekPhase::Idle;
                            return Poll::Ready(Err(e));
                        }
                        *phase = SeekPhase::Seeking;
                    }
                    SeekPhase::Seeking => {
                        let result = ready!(Pin::new(&mut **reader).poll_complete(cx));
                        *phase = SeekPhase::Idle;
                        result?;
                        break;
                    }
                }
            },
            Source::Buffered {
                buffer,
                limit,
                replay_pos,
                consumed,
                ..
            } => {
                if *consumed > buffer.len() as u64 {
                    return Poll::Ready(Err(BodyError::ReplayBufferExceeded {
                        read: *consumed,
                        limit: *limit,
                    }
                    .into()));
                }
                *replay_pos = if buffer.is_empty() { None } else { Some(0) };
            }
        }

        self.md5 = Md5::new();
        self.digest = None;
        self.bytes_read = 0;
        self.pending_wait = None;
        self.grant = None;
        Poll::Ready(Ok(()))
    }

    /// Wait for the throttle to grant bytes, returning how many may be read
    ///
    /// Leftover bytes from an earlier grant are only spent within the second
    /// they were counted against.
    fn poll_grant(&mut self, cx: &mut Context<'_>, wanted: u64) -> Poll<u64> {
        let Some(throttle) = self.throttle.clone() else {
            return Poll::Ready(wanted);
        };
        loop {
            if let Some(wait) = self.pending_wait.as_mut() {
                ready!(wait.as_mut().poll(cx));
                self.pending_wait = None;
            }
            let second = throttle.current_second();
            if let Some(grant) = self.grant
                && grant.second == second
                && grant.bytes > 0
            {
                return Poll::Ready(wanted.min(grant.bytes));
            }
            self.grant = None;
            match throttle.reserve_at(wanted, second) {
                Reservation::Granted(bytes) => self.grant = Some(Grant { second, bytes }),
                Reservation::Wait(d) => self.pending_wait = Some(Box::pin(tokio::time::sleep(d))),
            }
        }
    }

    fn poll_source(&mut self, cx: &mut Context<'_>, want: usize) -> Poll<io::Result<usize>> {
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }
        let scratch = &mut self.scratch[..want];

        match &mut self.source {
            Source::Memory { data, pos } => {
                let n = (data.len() - *pos).min(want);
                scratch[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Poll::Ready(Ok(n))
            }
            Source::Seekable { reader, .. } => {
                let mut rb = ReadBuf::new(scratch);
                ready!(Pin::new(&mut **reader).poll_read(cx, &mut rb))?;
                Poll::Ready(Ok(rb.filled().len()))
            }
            Source::Buffered {
                reader,
                buffer,
                limit,
                replay_pos,
                consumed,
            } => {
                if let Some(pos) = *replay_pos {
                    let n = (buffer.len() - pos).min(want);
                    scratch[..n].copy_from_slice(&buffer[pos..pos + n]);
                    *replay_pos = (pos + n < buffer.len()).then_some(pos + n);
                    return Poll::Ready(Ok(n));
                }

                let mut rb = ReadBuf::new(scratch);
                ready!(Pin::new(&mut **reader).poll_read(cx, &mut rb))?;
                let fresh = rb.filled();
                if *consumed == buffer.len() as u64 && buffer.len() + fresh.len() <= *limit {
                    buffer.extend_from_slice(fresh);
                } else if !buffer.is_empty() {
                    tracing::debug!(limit = *limit, "Upload stream outgrew its replay buffer");
                    buffer.clear();
                    buffer.shrink_to_fit();
                }
                *consumed += fresh.len() as u64;
                Poll::Ready(Ok(fresh.len()))
            }
        }
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 || self.digest.is_some() {
            return Poll::Ready(Ok(()));
        }

        let wanted = buf.remaining().min(READ_CHUNK) as u64;
        let allowed = ready!(self.poll_grant(cx, wanted)) as usize;
        let n = ready!(self.poll_source(cx, allowed))?;

        if n == 0 {
            self.grant = None;
            let digest: [u8; 16] = std::mem::take(&mut self.md5).finalize().into();
            self.digest = Some(digest);
            return Poll::Ready(Ok(()));
        }

        let chunk = &self.scratch[..n];
        self.md5.update(chunk);
        buf.put_slice(chunk);
        self.bytes_read += n as u64;
        if let Some(grant) = self.grant.as_mut() {
            grant.bytes = grant.bytes.saturating_sub(n as u64);
        }
        if let Some(progress) = &self.progress {
            progress(self.bytes_read);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for RepeatableBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.lock().poll_read(cx, buf)
    }
}
