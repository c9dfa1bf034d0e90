//! Per-request state and chunk reassembly.
//!
//! A [`PendingRequest`] is created when a member request is registered and is
//! driven by the dispatcher until the sender-declared number of chunks has
//! been consumed, or until the request is cancelled. All mutable state lives
//! behind one async lock so chunks for a nonce are forwarded strictly in
//! arrival order and the completion transition happens exactly once.

use crate::{GuildId, Member, MemberCache};
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Predicate applied to every received member before it is forwarded.
pub type MemberFilter = Arc<dyn Fn(&Member) -> bool + Send + Sync>;

/// Outcome of consuming one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkOutcome {
    /// Members handed to the consumer.
    pub forwarded: usize,
    /// Members rejected by the request's filter.
    pub filtered: usize,
    pub state: RequestState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// More chunks are expected.
    #[default]
    Pending,
    /// This chunk was the last one; the member channel has been closed.
    Complete,
    /// The request was cancelled or its consumer went away; the member
    /// channel has been closed.
    Abandoned,
}

impl RequestState {
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

struct ChunkState {
    tx: Option<mpsc::Sender<Member>>,
    /// Chunks consumed so far.
    chunks: u32,
}

pub struct PendingRequest {
    nonce: String,
    guild_id: GuildId,
    filter: Option<MemberFilter>,
    cancel: CancellationToken,
    /// Set once the last chunk has been forwarded, before the channel closes.
    complete: AtomicBool,
    state: Mutex<ChunkState>,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("nonce", &self.nonce)
            .field("guild_id", &self.guild_id)
            .field("filtered", &self.filter.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PendingRequest {
    pub fn new(
        nonce: String,
        guild_id: GuildId,
        filter: Option<MemberFilter>,
        tx: mpsc::Sender<Member>,
    ) -> Self {
        Self {
            nonce,
            guild_id,
            filter,
            cancel: CancellationToken::new(),
            complete: AtomicBool::new(false),
            state: Mutex::new(ChunkState {
                tx: Some(tx),
                chunks: 0,
            }),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub const fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Processes one chunk of members.
    ///
    /// Every member is offered to `cache`, whether or not the filter accepts
    /// it. Accepted members are sent to the consumer, waiting for channel
    /// capacity; this wait is what couples the dispatcher to slow consumers.
    /// Each send races the request's cancellation so a cancelled request never
    /// holds the dispatcher.
    ///
    /// The chunk that brings the consumed count to `chunk_count` completes the
    /// request. A `chunk_count` of zero is treated as one.
    pub async fn consume(
        &self,
        members: Vec<Member>,
        chunk_count: u32,
        cache: &dyn MemberCache,
    ) -> ChunkOutcome {
        let mut state = self.state.lock().await;
        let mut outcome = ChunkOutcome::default();

        let Some(tx) = state.tx.clone() else {
            // Already completed or closed by a previous chunk. Members are
            // still worth caching.
            for member in &members {
                cache.put(member);
            }
            outcome.state = RequestState::Abandoned;
            return outcome;
        };

        let mut open = !self.cancel.is_cancelled();
        for member in members {
            cache.put(&member);

            if let Some(filter) = &self.filter {
                if !filter(&member) {
                    outcome.filtered += 1;
                    continue;
                }
            }

            if !open {
                continue;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    open = false;
                }
                res = tx.send(member) => {
                    if res.is_err() {
                        // Receiver dropped without cancelling.
                        open = false;
                    } else {
                        outcome.forwarded += 1;
                    }
                }
            }
        }
        drop(tx);

        if !open {
            state.tx = None;
            outcome.state = RequestState::Abandoned;
        } else if state.chunks.saturating_add(1) >= chunk_count {
            self.complete.store(true, Ordering::Release);
            state.tx = None;
            state.chunks = state.chunks.saturating_add(1);
            outcome.state = RequestState::Complete;
        } else {
            state.chunks += 1;
        }

        outcome
    }

    /// Cancels the request and closes the member channel if no chunk is being
    /// forwarded right now. A chunk in flight closes it when it observes the
    /// cancellation.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
        if let Ok(mut state) = self.state.try_lock() {
            state.tx = None;
        }
    }

    /// Whether the last declared chunk has been consumed.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Number of chunks consumed so far.
    pub async fn chunks_consumed(&self) -> u32 {
        self.state.lock().await.chunks
    }

    /// Whether the member channel has been closed.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryMemberCache, tests::member};

    fn pending(
        filter: Option<MemberFilter>,
        capacity: usize,
    ) -> (PendingRequest, mpsc::Receiver<Member>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            PendingRequest::new("nonce".into(), GuildId::new(1), filter, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn completes_on_last_declared_chunk() {
        let cache = InMemoryMemberCache::default();
        let (request, mut rx) = pending(None, 16);

        let first = request.consume(vec![member(1, 10, "a")], 3, &cache).await;
        assert_eq!(first.state, RequestState::Pending);
        let second = request.consume(vec![member(1, 11, "b")], 3, &cache).await;
        assert_eq!(second.state, RequestState::Pending);
        let third = request.consume(vec![member(1, 12, "c")], 3, &cache).await;
        assert_eq!(third.state, RequestState::Complete);
        assert_eq!(request.chunks_consumed().await, 3);

        let mut ids = Vec::new();
        while let Some(m) = rx.recv().await {
            ids.push(m.user.id.get());
        }
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(request.is_complete());
        assert!(request.is_closed().await);
    }

    #[tokio::test]
    async fn filter_drops_but_still_caches() {
        let cache = InMemoryMemberCache::default();
        let reject_all: MemberFilter = Arc::new(|_: &Member| false);
        let (request, mut rx) = pending(Some(reject_all), 16);

        let outcome = request
            .consume(vec![member(1, 10, "a"), member(1, 11, "b")], 1, &cache)
            .await;

        assert_eq!(outcome.forwarded, 0);
        assert_eq!(outcome.filtered, 2);
        assert_eq!(outcome.state, RequestState::Complete);
        assert_eq!(cache.len(), 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn zero_chunk_count_completes_immediately() {
        let cache = InMemoryMemberCache::default();
        let (request, _rx) = pending(None, 1);
        let outcome = request.consume(Vec::new(), 0, &cache).await;
        assert_eq!(outcome.state, RequestState::Complete);
    }

    #[tokio::test]
    async fn chunks_after_completion_are_cached_not_forwarded() {
        let cache = InMemoryMemberCache::default();
        let (request, mut rx) = pending(None, 4);

        request.consume(vec![member(1, 10, "a")], 1, &cache).await;
        let late = request.consume(vec![member(1, 11, "b")], 1, &cache).await;

        assert_eq!(late.state, RequestState::Abandoned);
        assert_eq!(late.forwarded, 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(rx.recv().await.map(|m| m.user.id.get()), Some(10));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_releases_a_blocked_send() {
        let cache = Arc::new(InMemoryMemberCache::default());
        let (request, rx) = pending(None, 1);
        let request = Arc::new(request);

        // Capacity 1 and nobody reading: the second member blocks.
        let task = {
            let request = Arc::clone(&request);
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                request
                    .consume(vec![member(1, 10, "a"), member(1, 11, "b")], 2, &*cache)
                    .await
            })
        };

        while rx.is_empty() {
            tokio::task::yield_now().await;
        }
        request.close();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.forwarded, 1);
        assert_eq!(outcome.state, RequestState::Abandoned);
        assert!(request.is_closed().await);
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_request() {
        let cache = InMemoryMemberCache::default();
        let (request, rx) = pending(None, 4);
        drop(rx);

        let outcome = request.consume(vec![member(1, 10, "a")], 5, &cache).await;
        assert_eq!(outcome.state, RequestState::Abandoned);
        assert_eq!(cache.len(), 1);
    }
}
