use crate::{Member, PendingRequest, Registry};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancels one member request.
///
/// Cloneable and safe to call any number of times, including after the
/// request completed on its own (a no-op then).
#[derive(Clone, Debug)]
pub struct Canceller {
    registry: Arc<Registry>,
    request: Weak<PendingRequest>,
    token: CancellationToken,
}

impl Canceller {
    pub(crate) fn new(registry: Arc<Registry>, request: &Arc<PendingRequest>) -> Self {
        Self {
            registry,
            request: Arc::downgrade(request),
            token: request.cancellation().clone(),
        }
    }

    /// Removes the request from the registry and closes its member channel.
    ///
    /// Returns `true` if this call cancelled a live request.
    pub fn cancel(&self) -> bool {
        let Some(request) = self.request.upgrade() else {
            return false;
        };
        if request.is_complete() {
            return false;
        }
        if !self.registry.deregister_request(&request) {
            // Completed, or cancelled by an earlier call.
            return false;
        }
        request.close();

        #[cfg(feature = "tracing")]
        tracing::debug!(nonce = request.nonce(), "member request cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Live handle on the members returned for one request.
///
/// Members arrive in the order the gateway delivered them. The stream ends
/// after the last chunk, or as soon as the request is cancelled: once
/// cancellation is observable no further member is yielded, even if some were
/// already buffered.
///
/// Dropping the stream cancels the request. A stream that is kept alive must
/// be drained, otherwise the dispatcher stalls once its buffer fills.
#[derive(Debug)]
pub struct MemberStream {
    nonce: String,
    rx: mpsc::Receiver<Member>,
    canceller: Canceller,
}

impl MemberStream {
    pub(crate) fn new(
        registry: Arc<Registry>,
        request: &Arc<PendingRequest>,
        rx: mpsc::Receiver<Member>,
    ) -> Self {
        Self {
            nonce: request.nonce().to_owned(),
            rx,
            canceller: Canceller::new(registry, request),
        }
    }

    /// Nonce correlating this stream with its chunk events.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Receives the next member, or `None` once the request is complete or
    /// cancelled.
    pub async fn recv(&mut self) -> Option<Member> {
        if self.canceller.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.canceller.token.cancelled() => None,
            member = self.rx.recv() => member,
        }
    }

    /// Returns a handle that can cancel this request from elsewhere.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }
}

impl Stream for MemberStream {
    type Item = Member;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.canceller.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(member)) if self.canceller.is_cancelled() => {
                drop(member);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for MemberStream {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}
