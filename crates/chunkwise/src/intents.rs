use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Gateway intents negotiated by a shard at identify time.
    ///
    /// Only the intents this crate inspects are named; unknown bits are
    /// preserved so a shard can report its full negotiated set.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        /// Required to request guild members.
        const GUILD_MEMBERS = 1 << 1;
        /// When present, member requests also ask for presences.
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;

        const _ = !0;
    }
}

impl Intents {
    /// Returns `true` if any intent in `other` is absent from `self`.
    pub const fn missing(self, other: Self) -> bool {
        !self.contains(other)
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checks_every_bit() {
        let negotiated = Intents::GUILDS | Intents::GUILD_MEMBERS;
        assert!(!negotiated.missing(Intents::GUILD_MEMBERS));
        assert!(negotiated.missing(Intents::GUILD_PRESENCES));
        assert!(negotiated.missing(Intents::GUILD_MEMBERS | Intents::GUILD_PRESENCES));
    }

    #[test]
    fn display_names_flags() {
        assert_eq!(Intents::GUILD_MEMBERS.to_string(), "GUILD_MEMBERS");
    }
}
