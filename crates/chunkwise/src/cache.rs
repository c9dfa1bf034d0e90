use crate::{GuildId, Member, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Receives every member seen in a chunk, matched by a filter or not.
pub trait MemberCache: Send + Sync {
    fn put(&self, member: &Member);
}

/// A cache that stores nothing.
#[derive(Default, Clone, Copy, Debug)]
pub struct NoCache;

impl MemberCache for NoCache {
    fn put(&self, _member: &Member) {}
}

/// Members keyed by guild and user.
#[derive(Default, Debug)]
pub struct InMemoryMemberCache {
    members: RwLock<HashMap<(GuildId, UserId), Member>>,
}

impl InMemoryMemberCache {
    pub fn get(&self, guild_id: GuildId, user_id: UserId) -> Option<Member> {
        self.members.read().get(&(guild_id, user_id)).cloned()
    }

    pub fn guild_members(&self, guild_id: GuildId) -> Vec<Member> {
        self.members
            .read()
            .iter()
            .filter(|((g, _), _)| *g == guild_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemberCache for InMemoryMemberCache {
    fn put(&self, member: &Member) {
        self.members
            .write()
            .insert((member.guild_id, member.user.id), member.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::member;

    #[test]
    fn put_replaces_by_guild_and_user() {
        let cache = InMemoryMemberCache::default();
        cache.put(&member(1, 10, "a"));
        cache.put(&member(1, 10, "renamed"));
        cache.put(&member(2, 10, "a"));

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(GuildId::new(1), UserId::new(10)).unwrap().user.username,
            "renamed"
        );
        assert_eq!(cache.guild_members(GuildId::new(2)).len(), 1);
    }
}
