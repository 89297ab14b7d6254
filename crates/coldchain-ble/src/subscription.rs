//! Cancellable push streams for scan results and device events
//!
//! A subscription is the receiving half of a bounded channel plus a shared
//! closed flag. Once the flag is set, by the owner or by the manager, nothing
//! more is yielded, even events already buffered.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Producer half held by the manager
pub(crate) struct Subscriber<T> {
    tx: mpsc::Sender<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Subscriber<T> {
    /// Push one item; returns false once the subscription is gone
    pub(crate) fn deliver(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber is not keeping up, dropping item");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

/// Receiving half handed to callers
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Subscription<T> {
    /// Next item in delivery order, or `None` once closed
    pub async fn recv(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        let item = self.rx.recv().await?;
        if self.is_closed() {
            return None;
        }
        Some(item)
    }

    /// Next item if one is already buffered
    pub fn try_recv(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop receiving; buffered items are discarded
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(_)) if this.is_closed() => Poll::Ready(None),
            other => other,
        }
    }
}

/// Create a connected subscriber/subscription pair
pub(crate) fn channel<T>(buffer: usize) -> (Subscriber<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        Subscriber {
            tx,
            closed: closed.clone(),
        },
        Subscription { rx, closed },
    )
}
