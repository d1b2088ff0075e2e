//! # Audit Stream
//!
//! Read side of the notifier: every fired notification, optionally narrowed
//! to one kind.

use crate::events::{KindedEvent, Notification};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

/// Stream of notifications.
///
/// Ends when the notifier is dropped. A reader that falls more than the
/// audit capacity behind skips the missed notifications.
pub struct AuditStream<E: KindedEvent> {
    inner: BroadcastStream<Notification<E>>,
    kind: Option<E::Kind>,
}

impl<E: KindedEvent> AuditStream<E> {
    pub(crate) fn new(receiver: broadcast::Receiver<Notification<E>>, kind: Option<E::Kind>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            kind,
        }
    }

    fn matches(&self, notification: &Notification<E>) -> bool {
        self.kind
            .as_ref()
            .map_or(true, |kind| notification.event.kind() == kind)
    }
}

impl<E: KindedEvent> Stream for AuditStream<E> {
    type Item = Notification<E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(notification))) => {
                    if self.matches(&notification) {
                        return Poll::Ready(Some(notification));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    debug!(lagged = count, "Audit stream lagged, notifications dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<E: KindedEvent> Unpin for AuditStream<E> {}
