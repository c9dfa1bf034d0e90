use chunkwise::{GuildId, Member, RequestGuildMembers, User, UserId};
use rand::{Rng, rng};
use std::collections::HashMap;

const NAMES: &[&str] = &[
    "alice", "alan", "albert", "alma", "bob", "bea", "carol", "dave", "erin", "frank", "grace",
    "heidi", "ivan", "judy", "mallory", "niaj", "olivia", "peggy", "rupert", "sybil", "trent",
    "victor", "walter",
];

/// First guild timestamp. Consecutive guilds land on consecutive shards.
const GUILD_TIMESTAMP_BASE: u64 = 19_403_000_000;
const USER_TIMESTAMP_BASE: u64 = 20_000_000_000;

/// The members of one simulated guild, in join order.
#[derive(Debug)]
pub struct Roster {
    guild_id: GuildId,
    members: Vec<Member>,
    by_id: HashMap<UserId, usize>,
}

impl Roster {
    pub fn generate(guild_id: GuildId, size: usize) -> Self {
        let mut rng = rng();
        let members: Vec<Member> = (0..size as u64)
            .map(|i| {
                let name = NAMES[rng.random_range(0..NAMES.len())];
                let bot = rng.random_bool(0.05);
                Member {
                    guild_id,
                    user: User {
                        id: UserId::from_components(USER_TIMESTAMP_BASE + i, 0, i),
                        username: format!("{name}{i}"),
                        global_name: None,
                        bot,
                    },
                    nick: None,
                    roles: Vec::new(),
                    joined_at: String::new(),
                }
            })
            .collect();
        let by_id = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.user.id, i))
            .collect();
        Self {
            guild_id,
            members,
            by_id,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Resolves a member request the way the gateway does.
    ///
    /// Returns the matching members and, for id requests, the ids that are not
    /// in the guild. A zero limit is unbounded.
    pub fn select(&self, request: &RequestGuildMembers) -> (Vec<Member>, Vec<UserId>) {
        if let Some(user_ids) = &request.user_ids {
            let mut found = Vec::with_capacity(user_ids.len());
            let mut not_found = Vec::new();
            for id in user_ids {
                match self.by_id.get(id) {
                    Some(&i) => found.push(self.members[i].clone()),
                    None => not_found.push(*id),
                }
            }
            return (found, not_found);
        }

        let query = request.query.as_deref().unwrap_or_default().to_lowercase();
        let limit = match request.limit.unwrap_or(0) {
            0 => usize::MAX,
            n => n as usize,
        };
        let found = self
            .members
            .iter()
            .filter(|m| m.user.username.to_lowercase().starts_with(&query))
            .take(limit)
            .cloned()
            .collect();
        (found, Vec::new())
    }
}

/// All simulated guilds.
#[derive(Debug, Default)]
pub struct Rosters {
    guilds: HashMap<GuildId, Roster>,
}

impl Rosters {
    pub fn generate(guilds: u64, members: usize) -> Self {
        let guilds = (0..guilds)
            .map(|i| {
                let guild_id = GuildId::from_components(GUILD_TIMESTAMP_BASE + i, 0, 0);
                (guild_id, Roster::generate(guild_id, members))
            })
            .collect();
        Self { guilds }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<&Roster> {
        self.guilds.get(&guild_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Roster> {
        self.guilds.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(roster: &Roster) -> RequestGuildMembers {
        RequestGuildMembers {
            guild_id: roster.guild_id(),
            query: None,
            limit: None,
            presences: false,
            user_ids: None,
            nonce: "n".into(),
        }
    }

    #[test]
    fn selects_by_id_and_reports_missing() {
        let roster = Roster::generate(GuildId::new(1), 10);
        let known = roster.members()[3].user.id;
        let missing = UserId::new(7);

        let mut req = request(&roster);
        req.user_ids = Some(vec![known, missing]);
        let (found, not_found) = roster.select(&req);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user.id, known);
        assert_eq!(not_found, vec![missing]);
    }

    #[test]
    fn query_is_a_case_insensitive_prefix_with_limit() {
        let roster = Roster::generate(GuildId::new(1), 500);
        let mut req = request(&roster);
        req.query = Some("A".into());
        req.limit = Some(3);

        let (found, _) = roster.select(&req);
        assert!(found.len() <= 3);
        assert!(found.iter().all(|m| m.user.username.starts_with('a')));
    }

    #[test]
    fn empty_query_without_limit_selects_everyone() {
        let roster = Roster::generate(GuildId::new(1), 42);
        let mut req = request(&roster);
        req.query = Some(String::new());
        req.limit = Some(0);

        assert_eq!(roster.select(&req).0.len(), 42);
    }
}
