use crate::GuildId;
use std::collections::HashSet;

/// Decides which guilds are chunked automatically when they become available.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChunkingFilter {
    /// Never chunk automatically.
    #[default]
    None,
    All,
    Include(HashSet<GuildId>),
    Exclude(HashSet<GuildId>),
}

impl ChunkingFilter {
    pub fn include(guilds: impl IntoIterator<Item = GuildId>) -> Self {
        Self::Include(guilds.into_iter().collect())
    }

    pub fn exclude(guilds: impl IntoIterator<Item = GuildId>) -> Self {
        Self::Exclude(guilds.into_iter().collect())
    }

    pub fn should_chunk(&self, guild_id: GuildId) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Include(guilds) => guilds.contains(&guild_id),
            Self::Exclude(guilds) => !guilds.contains(&guild_id),
        }
    }
}
