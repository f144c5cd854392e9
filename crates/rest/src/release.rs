//! Response bodies that give their connection back exactly once
//!
//! [`ReleasingBody`] wraps a response stream together with a release hook.
//! The hook runs the first time any of these happen: the stream reaches its
//! end, a read fails, the caller closes it, or it is dropped. Later events
//! are no-ops.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use stowage_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Streaming response body tied to its connection
pub struct ReleasingBody {
    inner: Option<Box<dyn AsyncRead + Send + Unpin>>,
    on_release: Option<ReleaseHook>,
}

impl ReleasingBody {
    /// Wrap a stream, running `on_release` once it is finished with
    pub fn new<R, F>(inner: R, on_release: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Some(Box::new(inner)),
            on_release: Some(Box::new(on_release)),
        }
    }

    /// A body with no content and nothing to release
    pub fn empty() -> Self {
        Self {
            inner: None,
            on_release: None,
        }
    }

    /// Whether the underlying connection has been released
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Stop reading and release the connection
    pub fn close(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.inner = None;
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }

    /// Read the remaining content, releasing the connection
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {e}")))?;
        self.release();
        Ok(buf)
    }

    /// Read the remaining content as text, releasing the connection
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for ReleasingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasingBody")
            .field("released", &self.is_released())
            .finish()
    }
}

impl AsyncRead for ReleasingBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let before = buf.filled().len();
        match ready!(Pin::new(inner).poll_read(cx, buf)) {
            Ok(()) => {
                if buf.filled().len() == before && buf.remaining() > 0 {
                    self.release();
                }
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                self.release();
                Poll::Ready(Err(e))
            }
        }
    }
}

impl Drop for ReleasingBody {
    fn drop(&mut self) {
        self.release();
    }
}
