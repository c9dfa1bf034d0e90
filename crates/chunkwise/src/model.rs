//! Gateway payloads touched by member chunking.
//!
//! Only the fields this crate reads or writes are modelled; unknown fields in
//! inbound payloads are ignored by serde.

use crate::{GuildId, Result, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcode for `REQUEST_GUILD_MEMBERS`.
pub const OPCODE_REQUEST_GUILD_MEMBERS: u8 = 8;

/// Dispatch event name for member chunks.
pub const GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// A member of a guild.
///
/// Chunk payloads omit `guild_id` on each member; the dispatcher stamps it
/// from the enclosing event before the member is cached or forwarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default = "unset_guild")]
    pub guild_id: GuildId,
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<u64>,
    #[serde(default)]
    pub joined_at: String,
}

const fn unset_guild() -> GuildId {
    GuildId::new(0)
}

impl Member {
    /// Nickname if set, otherwise the global name, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.user.global_name.as_deref())
            .unwrap_or(&self.user.username)
    }
}

/// Payload of the `REQUEST_GUILD_MEMBERS` command.
///
/// Exactly one of `query` or `user_ids` is set. An empty `query` with a zero
/// `limit` asks for every member of the guild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    pub guild_id: GuildId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default)]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<UserId>>,
    pub nonce: String,
}

/// Outbound gateway commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCommand {
    RequestGuildMembers(RequestGuildMembers),
}

impl GatewayCommand {
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::RequestGuildMembers(_) => OPCODE_REQUEST_GUILD_MEMBERS,
        }
    }

    /// Wraps the command in the `{ "op": .., "d": .. }` envelope.
    pub fn to_payload(&self) -> Result<Value> {
        let data = match self {
            Self::RequestGuildMembers(data) => serde_json::to_value(data)?,
        };
        Ok(serde_json::json!({ "op": self.opcode(), "d": data }))
    }
}

/// Payload of the `GUILD_MEMBERS_CHUNK` dispatch event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: GuildId,
    #[serde(default)]
    pub members: Vec<Member>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_found: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Decoded inbound gateway events as seen by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    GuildMembersChunk(GuildMembersChunk),
    /// Any other dispatch; ignored by member chunking.
    Other { kind: String },
}

impl GatewayEvent {
    /// Decodes a dispatch by its event name and `d` payload.
    pub fn decode(kind: &str, data: Value) -> Result<Self> {
        if kind == GUILD_MEMBERS_CHUNK {
            return Ok(Self::GuildMembersChunk(serde_json::from_value(data)?));
        }
        Ok(Self::Other {
            kind: kind.to_owned(),
        })
    }
}
