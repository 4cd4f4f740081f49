// Size-limited wrapper for byte chunk streams.
// Used to make sure a single submitted part cannot grow beyond a fixed size
// without buffering the whole part first.

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

// Maximum size of a single submitted part
pub const MAX_PART_SIZE_BYTES: u64 = 500 * 1024; // 500KiB

/// Raised once more bytes than allowed went through a [`SizeLimitedStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimitExceeded {
    pub max_size: u64,
    pub current_size: u64,
}

impl std::fmt::Display for SizeLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stream size limit ({} bytes) reached: {} bytes",
            self.max_size, self.current_size
        )
    }
}

impl std::error::Error for SizeLimitExceeded {}

/// Error of a [`SizeLimitedStream`]: either the limit or an error of the wrapped stream.
#[derive(Debug)]
pub enum LimitedReadError<E> {
    Limit(SizeLimitExceeded),
    Source(E),
}

impl<E: std::fmt::Display> std::fmt::Display for LimitedReadError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit(err) => write!(f, "{}", err),
            Self::Source(err) => write!(f, "Failed to read stream: {}", err),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimitedReadError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Limit(err) => Some(err),
            Self::Source(err) => Some(err),
        }
    }
}

/// Stream of byte chunks that fails once the cumulative size exceeds `max_size`.
///
/// The size is checked after every chunk, so memory use stays bounded by
/// `max_size` plus one chunk no matter how large the wrapped stream is.
/// After the limit error the stream is finished.
pub struct SizeLimitedStream<S> {
    inner: S,
    max_size: u64,
    current_size: u64,
    finished: bool,
}

impl<S> SizeLimitedStream<S> {
    pub fn new(inner: S, max_size: u64) -> Self {
        Self {
            inner,
            max_size,
            current_size: 0,
            finished: false,
        }
    }
}

impl<S, E> SizeLimitedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    /// Collects the whole stream, failing on the first error or when the limit is exceeded.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, LimitedReadError<E>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

impl<S, E> Stream for SizeLimitedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, LimitedReadError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.current_size += chunk.len() as u64;
                if this.current_size > this.max_size {
                    this.finished = true;
                    return Poll::Ready(Some(Err(LimitedReadError::Limit(SizeLimitExceeded {
                        max_size: this.max_size,
                        current_size: this.current_size,
                    }))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(LimitedReadError::Source(err)))),
            None => {
                this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}
