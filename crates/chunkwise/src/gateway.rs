//! Seams to the gateway connection.
//!
//! Framing, heartbeating and resuming belong to the shard implementation. This
//! crate only needs to know a shard's negotiated intents and how to hand it a
//! command.

use crate::{Error, GatewayCommand, GuildId, Intents, Result, TransportError};
use async_trait::async_trait;
use std::sync::Arc;

/// One gateway connection.
#[async_trait]
pub trait Shard: Send + Sync {
    fn shard_id(&self) -> u32;

    /// Intents negotiated when the shard identified.
    fn intents(&self) -> Intents;

    /// Frames and sends a command.
    async fn send(&self, command: GatewayCommand) -> Result<(), TransportError>;
}

/// Resolves the shard responsible for a guild.
pub trait ShardRouter: Send + Sync {
    fn shard_for(&self, guild_id: GuildId) -> Result<Arc<dyn Shard>>;
}

/// A fixed set of shards, routed by `(guild_id >> 22) % shard_count`.
#[derive(Clone, Default)]
pub struct ShardSet {
    shards: Vec<Arc<dyn Shard>>,
}

impl ShardSet {
    /// `shards[i]` must be shard `i`.
    pub fn new(shards: Vec<Arc<dyn Shard>>) -> Self {
        Self { shards }
    }

    pub fn single(shard: Arc<dyn Shard>) -> Self {
        Self::new(vec![shard])
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl ShardRouter for ShardSet {
    fn shard_for(&self, guild_id: GuildId) -> Result<Arc<dyn Shard>> {
        if self.shards.is_empty() {
            return Err(Error::ShardNotFound { guild_id });
        }
        let index = guild_id.shard_index(self.shards.len() as u64) as usize;
        self.shards
            .get(index)
            .cloned()
            .ok_or(Error::ShardNotFound { guild_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockShard;

    #[test]
    fn routes_by_guild_timestamp() {
        let shards: Vec<Arc<dyn Shard>> = (0..4)
            .map(|id| Arc::new(MockShard::with_id(id, Intents::GUILD_MEMBERS)) as Arc<dyn Shard>)
            .collect();
        let set = ShardSet::new(shards);

        for raw in [0_u64, 1 << 22, 2 << 22, 7 << 22, 81_384_788_765_712_384] {
            let guild_id = GuildId::new(raw);
            let shard = set.shard_for(guild_id).unwrap();
            assert_eq!(u64::from(shard.shard_id()), (raw >> 22) % 4);
        }
    }

    #[test]
    fn empty_set_has_no_shard() {
        let set = ShardSet::default();
        assert!(matches!(
            set.shard_for(GuildId::new(1)),
            Err(Error::ShardNotFound { .. })
        ));
    }
}
