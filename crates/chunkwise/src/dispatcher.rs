//! Routing of inbound chunk events to pending requests.
//!
//! [`ChunkDispatcher`] is the only consumer of the shared event stream. For
//! each chunk it looks the nonce up under the registry's read lock, releases
//! that lock, and then lets the request consume the chunk under the request's
//! own lock. A miss is expected (the requester may have given up already) and
//! is only logged.
//!
//! Consuming a chunk waits until the request's consumer has room for every
//! accepted member, so one slow consumer delays every other request on the
//! same stream until it reads or cancels.

use crate::{GatewayEvent, GuildMembersChunk, MemberCache, Registry, RequestState};
use core::sync::atomic::{AtomicU64, Ordering};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Counters {
    chunks: AtomicU64,
    unmatched: AtomicU64,
    forwarded: AtomicU64,
    filtered: AtomicU64,
    not_found: AtomicU64,
    completed: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Chunk events received, matched or not.
    pub chunks: u64,
    /// Chunk events with no pending request.
    pub unmatched: u64,
    pub forwarded: u64,
    pub filtered: u64,
    /// User ids the gateway reported as not found.
    pub not_found: u64,
    /// Requests that received their last chunk.
    pub completed: u64,
}

#[derive(Clone)]
pub struct ChunkDispatcher {
    registry: Arc<Registry>,
    cache: Arc<dyn MemberCache>,
    counters: Arc<Counters>,
}

impl core::fmt::Debug for ChunkDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChunkDispatcher")
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ChunkDispatcher {
    pub(crate) fn new(registry: Arc<Registry>, cache: Arc<dyn MemberCache>) -> Self {
        Self {
            registry,
            cache,
            counters: Arc::default(),
        }
    }

    /// Handles one decoded gateway event. Events other than member chunks are
    /// ignored.
    pub async fn dispatch(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::GuildMembersChunk(chunk) => self.handle_chunk(chunk).await,
            GatewayEvent::Other { kind: _kind } => {
                #[cfg(feature = "tracing")]
                tracing::trace!(kind = %_kind, "ignoring gateway event");
            }
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(
        level = "trace",
        skip_all,
        fields(guild_id = %chunk.guild_id, chunk = chunk.chunk_index, of = chunk.chunk_count)
    ))]
    pub async fn handle_chunk(&self, chunk: GuildMembersChunk) {
        self.counters.chunks.fetch_add(1, Ordering::Relaxed);

        let request = chunk
            .nonce
            .as_deref()
            .and_then(|nonce| self.registry.lookup(nonce));
        let Some(request) = request else {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                nonce = chunk.nonce.as_deref().unwrap_or_default(),
                members = chunk.members.len(),
                "received unknown member chunk event"
            );
            return;
        };

        if !chunk.not_found.is_empty() {
            self.counters
                .not_found
                .fetch_add(chunk.not_found.len() as u64, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                nonce = request.nonce(),
                not_found = ?chunk.not_found,
                "gateway could not find requested users"
            );
        }

        let guild_id = chunk.guild_id;
        let mut members = chunk.members;
        for member in &mut members {
            member.guild_id = guild_id;
        }

        let outcome = request
            .consume(members, chunk.chunk_count, &*self.cache)
            .await;
        self.counters
            .forwarded
            .fetch_add(outcome.forwarded as u64, Ordering::Relaxed);
        self.counters
            .filtered
            .fetch_add(outcome.filtered as u64, Ordering::Relaxed);

        if outcome.state == RequestState::Complete {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.state.is_finished() && self.registry.deregister_request(&request) {
            #[cfg(feature = "tracing")]
            tracing::debug!(nonce = request.nonce(), state = ?outcome.state, "member request finished");
        }
    }

    /// Dispatches events until the stream ends or `shutdown` is cancelled.
    ///
    /// Shutdown also interrupts an event that is waiting on a full member
    /// channel. That request keeps the chunks it had consumed before the
    /// interrupted one and stays registered until it is cancelled.
    pub async fn run<S>(&self, events: S, shutdown: CancellationToken)
    where
        S: Stream<Item = GatewayEvent>,
    {
        let mut events = core::pin::pin!(events);

        #[cfg(feature = "tracing")]
        tracing::debug!("chunk dispatcher started");

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            let Some(event) = event else { break };

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = self.dispatch(event) => {}
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(stats = ?self.stats(), "chunk dispatcher stopped");
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            chunks: c.chunks.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
        }
    }
}
