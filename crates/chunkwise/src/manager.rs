//! The public face of member chunking.
//!
//! Every request shape funnels into [`MemberChunkingManager::request`], which
//! registers a [`PendingRequest`] under a fresh nonce, sends the command to the
//! guild's shard and returns a [`MemberStream`]. The aggregate forms only drain
//! that stream, racing it against a cancellation token.

use crate::{
    ChunkDispatcher, ChunkingConfig, ChunkingFilter, Error, GatewayCommand, GuildId, Intents,
    Member, MemberCache, MemberFilter, MemberStream, NonceSource, PendingRequest, Registry,
    RequestGuildMembers, Result, ShardRouter, ThreadNonce, UserId,
};
use core::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Which members the gateway is asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberScope {
    /// Exactly these users.
    UserIds(Vec<UserId>),
    /// Members whose username starts with `query`, at most `limit` of them.
    /// An empty query with a zero limit selects every member.
    Query { query: String, limit: u32 },
}

/// A member request before it has been registered.
#[derive(Clone)]
pub struct MemberRequest {
    pub guild_id: GuildId,
    pub scope: MemberScope,
    pub filter: Option<MemberFilter>,
}

impl fmt::Debug for MemberRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberRequest")
            .field("guild_id", &self.guild_id)
            .field("scope", &self.scope)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl MemberRequest {
    pub fn by_ids(guild_id: GuildId, user_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            guild_id,
            scope: MemberScope::UserIds(user_ids.into_iter().collect()),
            filter: None,
        }
    }

    pub fn by_query(guild_id: GuildId, query: impl Into<String>, limit: u32) -> Self {
        Self {
            guild_id,
            scope: MemberScope::Query {
                query: query.into(),
                limit,
            },
            filter: None,
        }
    }

    pub fn all(guild_id: GuildId) -> Self {
        Self::by_query(guild_id, "", 0)
    }

    /// Every member of the guild, keeping only those `filter` accepts.
    pub fn filtered<F>(guild_id: GuildId, filter: F) -> Self
    where
        F: Fn(&Member) -> bool + Send + Sync + 'static,
    {
        Self::all(guild_id).with_filter(filter)
    }

    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Member) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

/// Issues member requests and correlates their chunked replies.
///
/// The manager does not read the gateway itself. Feed inbound events to the
/// [`ChunkDispatcher`] returned by [`Self::dispatcher`], typically through
/// [`ChunkDispatcher::run`] on a dedicated task.
///
/// # Example
/// ```no_run
/// use chunkwise::{
///     ChunkingConfig, GuildId, InMemoryMemberCache, MemberChunkingManager, ShardSet,
/// };
/// use std::sync::Arc;
///
/// # async fn demo(shards: ShardSet) -> chunkwise::Result<()> {
/// let manager = MemberChunkingManager::new(
///     Arc::new(shards),
///     Arc::new(InMemoryMemberCache::default()),
///     ChunkingConfig::default(),
/// )?;
///
/// let members = manager
///     .request_members_with_query(GuildId::new(81_384_788_765_712_384), "al", 5)
///     .await?;
/// println!("{} members", members.len());
/// # Ok(())
/// # }
/// ```
pub struct MemberChunkingManager {
    shards: Arc<dyn ShardRouter>,
    registry: Arc<Registry>,
    dispatcher: ChunkDispatcher,
    config: ChunkingConfig,
    chunking_filter: ChunkingFilter,
}

impl fmt::Debug for MemberChunkingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberChunkingManager")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("chunking_filter", &self.chunking_filter)
            .finish_non_exhaustive()
    }
}

impl MemberChunkingManager {
    /// Creates a manager drawing nonces from the thread-local RNG.
    ///
    /// # Errors
    /// - Returns [`Error::InvalidRequest`] if `config` fails validation.
    pub fn new(
        shards: Arc<dyn ShardRouter>,
        cache: Arc<dyn MemberCache>,
        config: ChunkingConfig,
    ) -> Result<Self> {
        let nonces = ThreadNonce::new(config.nonce_len);
        Self::with_nonce_source(shards, cache, config, nonces)
    }

    /// Creates a manager with a custom nonce source.
    ///
    /// # Errors
    /// - Returns [`Error::InvalidRequest`] if `config` fails validation.
    pub fn with_nonce_source(
        shards: Arc<dyn ShardRouter>,
        cache: Arc<dyn MemberCache>,
        config: ChunkingConfig,
        nonces: impl NonceSource + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new(nonces));
        let dispatcher = ChunkDispatcher::new(Arc::clone(&registry), cache);
        Ok(Self {
            shards,
            registry,
            dispatcher,
            config,
            chunking_filter: ChunkingFilter::default(),
        })
    }

    #[must_use]
    pub fn with_chunking_filter(mut self, filter: ChunkingFilter) -> Self {
        self.chunking_filter = filter;
        self
    }

    /// Which guilds should be chunked as soon as they become available.
    pub fn chunking_filter(&self) -> &ChunkingFilter {
        &self.chunking_filter
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// The dispatcher that routes chunk events to this manager's requests.
    /// Every clone shares the same registry and counters.
    pub fn dispatcher(&self) -> ChunkDispatcher {
        self.dispatcher.clone()
    }

    /// Number of requests still waiting for chunks.
    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    pub fn is_pending(&self, nonce: &str) -> bool {
        self.registry.contains(nonce)
    }

    /// Cancels every pending request. Returns how many were cancelled.
    ///
    /// Requests whose last chunk has already been consumed are removed but
    /// left to finish, so their consumers still see every member.
    pub fn shutdown(&self) -> usize {
        let mut cancelled = 0;
        for request in self.registry.drain() {
            if request.is_complete() {
                continue;
            }
            request.close();
            cancelled += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(cancelled, "member chunking shut down");
        cancelled
    }

    /// Registers a request, sends it, and returns the stream its members
    /// arrive on.
    ///
    /// # Errors
    /// - [`Error::ShardNotFound`] if no shard serves the guild.
    /// - [`Error::MissingIntent`] if the shard lacks `GUILD_MEMBERS`.
    /// - [`Error::InvalidRequest`] if more user ids are given than the
    ///   gateway accepts.
    /// - [`Error::NonceExhausted`] if no unused nonce could be drawn.
    /// - [`Error::SendFailed`] if the shard could not send the command. The
    ///   request is no longer registered when this is returned.
    ///
    /// None of these leave a request registered.
    #[cfg_attr(feature = "tracing", tracing::instrument(
        level = "debug",
        skip_all,
        fields(guild_id = %request.guild_id)
    ))]
    pub async fn request(&self, request: MemberRequest) -> Result<MemberStream> {
        let shard = self.shards.shard_for(request.guild_id)?;
        let intents = shard.intents();
        if intents.missing(Intents::GUILD_MEMBERS) {
            return Err(Error::MissingIntent {
                intent: Intents::GUILD_MEMBERS,
            });
        }

        let MemberRequest {
            guild_id,
            scope,
            filter,
        } = request;
        let (query, limit, user_ids) = match scope {
            MemberScope::UserIds(ids) => {
                if ids.len() > self.config.max_user_ids {
                    return Err(Error::InvalidRequest {
                        reason: format!(
                            "at most {} user ids per request, got {}",
                            self.config.max_user_ids,
                            ids.len()
                        ),
                    });
                }
                (None, None, Some(ids))
            }
            MemberScope::Query { query, limit } => (Some(query), Some(limit), None),
        };

        let (tx, rx) = mpsc::channel(self.config.sink_capacity);
        let pending = self
            .registry
            .register_with(|nonce| PendingRequest::new(nonce, guild_id, filter, tx))?;

        // From here on, dropping the stream (including dropping this future
        // while the send is in flight) cancels the registration.
        let stream = MemberStream::new(Arc::clone(&self.registry), &pending, rx);

        #[cfg(feature = "tracing")]
        tracing::trace!(nonce = pending.nonce(), "member request registered");

        let command = GatewayCommand::RequestGuildMembers(RequestGuildMembers {
            guild_id,
            query,
            limit,
            presences: intents.contains(Intents::GUILD_PRESENCES),
            user_ids,
            nonce: pending.nonce().to_owned(),
        });

        if let Err(e) = shard.send(command).await {
            stream.cancel();
            #[cfg(feature = "tracing")]
            tracing::warn!(nonce = pending.nonce(), error = %e, "failed to send member request");
            return Err(Error::SendFailed(e));
        }

        Ok(stream)
    }

    /// Sends `request` and gathers every member it yields.
    ///
    /// Resolves once the last chunk has been forwarded or `cancel` fires,
    /// whichever comes first. Cancellation always yields
    /// [`Error::Cancelled`], never a partial list.
    #[cfg_attr(feature = "tracing", tracing::instrument(
        level = "debug",
        skip_all,
        fields(guild_id = %request.guild_id)
    ))]
    pub async fn collect(
        &self,
        request: MemberRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut stream = self.request(request).await?;
        let mut members = Vec::new();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    stream.cancel();
                    return Err(Error::Cancelled);
                }
                member = stream.recv() => match member {
                    Some(member) => members.push(member),
                    None if stream.is_cancelled() => return Err(Error::Cancelled),
                    None => return Ok(members),
                },
            }
        }
    }

    /// [`Self::collect`] bounded by the configured `request_timeout`, if any.
    async fn collect_within_timeout(&self, request: MemberRequest) -> Result<Vec<Member>> {
        let cancel = CancellationToken::new();
        let Some(after) = self.config.request_timeout else {
            return self.collect(request, &cancel).await;
        };
        match tokio::time::timeout(after, self.collect(request, &cancel)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?after, "member request timed out");
                Err(Error::TimedOut { after })
            }
        }
    }

    /// Requests the given users.
    pub async fn request_members(
        &self,
        guild_id: GuildId,
        user_ids: impl IntoIterator<Item = UserId>,
    ) -> Result<Vec<Member>> {
        self.collect_within_timeout(MemberRequest::by_ids(guild_id, user_ids))
            .await
    }

    pub async fn request_members_ctx(
        &self,
        guild_id: GuildId,
        user_ids: impl IntoIterator<Item = UserId>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        self.collect(MemberRequest::by_ids(guild_id, user_ids), cancel)
            .await
    }

    pub async fn request_members_stream(
        &self,
        guild_id: GuildId,
        user_ids: impl IntoIterator<Item = UserId>,
    ) -> Result<MemberStream> {
        self.request(MemberRequest::by_ids(guild_id, user_ids))
            .await
    }

    /// Requests up to `limit` members whose username starts with `query`.
    pub async fn request_members_with_query(
        &self,
        guild_id: GuildId,
        query: impl Into<String>,
        limit: u32,
    ) -> Result<Vec<Member>> {
        self.collect_within_timeout(MemberRequest::by_query(guild_id, query, limit))
            .await
    }

    pub async fn request_members_with_query_ctx(
        &self,
        guild_id: GuildId,
        query: impl Into<String>,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        self.collect(MemberRequest::by_query(guild_id, query, limit), cancel)
            .await
    }

    pub async fn request_members_with_query_stream(
        &self,
        guild_id: GuildId,
        query: impl Into<String>,
        limit: u32,
    ) -> Result<MemberStream> {
        self.request(MemberRequest::by_query(guild_id, query, limit))
            .await
    }

    /// Requests every member of the guild.
    pub async fn request_all_members(&self, guild_id: GuildId) -> Result<Vec<Member>> {
        self.collect_within_timeout(MemberRequest::all(guild_id))
            .await
    }

    pub async fn request_all_members_ctx(
        &self,
        guild_id: GuildId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        self.collect(MemberRequest::all(guild_id), cancel).await
    }

    pub async fn request_all_members_stream(&self, guild_id: GuildId) -> Result<MemberStream> {
        self.request(MemberRequest::all(guild_id)).await
    }

    /// Requests every member of the guild, keeping those `filter` accepts.
    /// Rejected members still reach the cache.
    pub async fn request_members_with_filter<F>(
        &self,
        guild_id: GuildId,
        filter: F,
    ) -> Result<Vec<Member>>
    where
        F: Fn(&Member) -> bool + Send + Sync + 'static,
    {
        self.collect_within_timeout(MemberRequest::filtered(guild_id, filter))
            .await
    }

    pub async fn request_members_with_filter_ctx<F>(
        &self,
        guild_id: GuildId,
        filter: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>>
    where
        F: Fn(&Member) -> bool + Send + Sync + 'static,
    {
        self.collect(MemberRequest::filtered(guild_id, filter), cancel)
            .await
    }

    pub async fn request_members_with_filter_stream<F>(
        &self,
        guild_id: GuildId,
        filter: F,
    ) -> Result<MemberStream>
    where
        F: Fn(&Member) -> bool + Send + Sync + 'static,
    {
        self.request(MemberRequest::filtered(guild_id, filter))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        NoCache, RequestState, ShardSet,
        tests::{MockShard, member},
    };

    const GUILD: GuildId = GuildId::new(81_384_788_765_712_384);

    #[tokio::test]
    async fn shutdown_lets_a_finished_request_deliver() {
        let shard = Arc::new(MockShard::new(Intents::GUILD_MEMBERS));
        let manager = Arc::new(
            MemberChunkingManager::new(
                Arc::new(ShardSet::single(shard.clone())),
                Arc::new(NoCache),
                ChunkingConfig::default(),
            )
            .unwrap(),
        );

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .collect(MemberRequest::all(GUILD), &CancellationToken::new())
                    .await
            })
        };
        let sent = shard.next_request().await;

        // The last chunk is consumed but the dispatcher has not deregistered
        // the request yet.
        let pending = manager.registry.lookup(&sent.nonce).unwrap();
        let outcome = pending
            .consume(vec![member(GUILD.get(), 1, "alice")], 1, &NoCache)
            .await;
        assert_eq!(outcome.state, RequestState::Complete);

        assert_eq!(manager.shutdown(), 0);
        assert_eq!(manager.pending_requests(), 0);

        let members = waiter.await.unwrap().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user.id, UserId::new(1));
    }

    #[tokio::test]
    async fn exhausted_nonces_register_and_send_nothing() {
        let shard = Arc::new(MockShard::new(Intents::GUILD_MEMBERS));
        let manager = MemberChunkingManager::with_nonce_source(
            Arc::new(ShardSet::single(shard.clone())),
            Arc::new(NoCache),
            ChunkingConfig::default(),
            crate::tests::ScriptedNonce::new(
                core::iter::repeat_n("taken", crate::MAX_NONCE_ATTEMPTS + 1),
            ),
        )
        .unwrap();

        let _first = manager.request_all_members_stream(GUILD).await.unwrap();
        let err = manager.request_all_members_stream(GUILD).await.unwrap_err();

        assert!(matches!(err, Error::NonceExhausted { .. }));
        assert_eq!(shard.sent().len(), 1);
        assert_eq!(manager.pending_requests(), 1);
    }
}
