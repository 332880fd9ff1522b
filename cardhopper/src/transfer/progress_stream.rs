//! Byte-counting stream wrapper used by the copier.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Callback receiving the cumulative byte count
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Stream wrapper that reports the running byte total after every chunk
pub struct ProgressStream<S> {
    inner: S,
    bytes_transferred: u64,
    callback: Option<ProgressCallback>,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, callback: Option<ProgressCallback>) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            callback,
        }
    }

    /// Get total bytes transferred
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = Pin::new(&mut self.inner);

        match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                self.bytes_transferred += bytes.len() as u64;
                if let Some(callback) = &self.callback {
                    callback(self.bytes_transferred);
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            other => other,
        }
    }
}
