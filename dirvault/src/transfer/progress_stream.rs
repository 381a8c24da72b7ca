//! Progress-tracking stream wrapper for upload bodies.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::format_bytes;

/// Stream wrapper that counts bytes passing through and logs progress for
/// `label` at debug level, at most every `update_interval`.
pub struct ProgressStream<S> {
    inner: S,
    label: String,
    total_bytes: u64,
    bytes_transferred: u64,
    last_update: Instant,
    update_interval: Duration,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, label: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            inner,
            label: label.into(),
            total_bytes,
            bytes_transferred: 0,
            last_update: Instant::now(),
            update_interval: Duration::from_secs(5),
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    fn report(&self) {
        let percent = if self.total_bytes > 0 {
            (self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else {
            100.0
        };
        debug!(
            "{}: {} of {} ({:.1}%)",
            self.label,
            format_bytes(self.bytes_transferred),
            format_bytes(self.total_bytes),
            percent
        );
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                self.bytes_transferred += bytes.len() as u64;

                let now = Instant::now();
                if now.duration_since(self.last_update) >= self.update_interval {
                    self.report();
                    self.last_update = now;
                }

                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(None) => {
                self.report();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
