//! Snowflake identifiers used by the gateway.
//!
//! Guilds and users are addressed by 64-bit snowflakes in the Discord layout:
//!
//! ```text
//!  Bit Index:  63             22 21             12 11             0
//!              +----------------+-----------------+---------------+
//!  Field:      | timestamp (42) | machine ID (10) | sequence (12) |
//!              +----------------+-----------------+---------------+
//!              |<----- MSB ---------- 64 bits --------- LSB ----->|
//! ```
//!
//! On the wire they travel as decimal strings, so the serde impls emit
//! strings and accept either strings or integers.

use core::{fmt, marker::PhantomData, str::FromStr, time::Duration};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

/// Discord epoch: Thursday, January 1, 2015 00:00:00 UTC
pub const DISCORD_EPOCH: Duration = Duration::from_millis(1_420_070_400_000);

const TIMESTAMP_SHIFT: u64 = 22;
const MACHINE_ID_SHIFT: u64 = 12;
const MACHINE_ID_MASK: u64 = (1 << 10) - 1;
const SEQUENCE_MASK: u64 = (1 << 12) - 1;

/// Marker for the kind of entity a [`Snowflake`] addresses.
pub trait Marker: Copy + Eq + Ord + core::hash::Hash {
    const NAME: &'static str;
}

/// Marker for guild identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GuildMarker {}

/// Marker for user identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UserMarker {}

impl Marker for GuildMarker {
    const NAME: &'static str = "GuildId";
}

impl Marker for UserMarker {
    const NAME: &'static str = "UserId";
}

/// A typed 64-bit snowflake.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake<M: Marker> {
    id: u64,
    _marker: PhantomData<M>,
}

pub type GuildId = Snowflake<GuildMarker>;
pub type UserId = Snowflake<UserMarker>;

impl<M: Marker> Snowflake<M> {
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Builds an ID from its components. Out-of-range components are masked.
    pub const fn from_components(timestamp: u64, machine_id: u64, sequence: u64) -> Self {
        Self::new(
            (timestamp << TIMESTAMP_SHIFT)
                | ((machine_id & MACHINE_ID_MASK) << MACHINE_ID_SHIFT)
                | (sequence & SEQUENCE_MASK),
        )
    }

    pub const fn get(self) -> u64 {
        self.id
    }

    /// Milliseconds since [`DISCORD_EPOCH`].
    pub const fn timestamp(self) -> u64 {
        self.id >> TIMESTAMP_SHIFT
    }

    pub const fn machine_id(self) -> u64 {
        (self.id >> MACHINE_ID_SHIFT) & MACHINE_ID_MASK
    }

    pub const fn sequence(self) -> u64 {
        self.id & SEQUENCE_MASK
    }

    /// Wall-clock creation time encoded in the ID.
    pub fn created_at(self) -> SystemTime {
        SystemTime::UNIX_EPOCH + DISCORD_EPOCH + Duration::from_millis(self.timestamp())
    }

    /// Index of the shard that owns this ID when `shard_count` shards are
    /// connected. Only meaningful for guild IDs.
    pub const fn shard_index(self, shard_count: u64) -> u64 {
        if shard_count == 0 {
            return 0;
        }
        self.timestamp() % shard_count
    }
}

impl<M: Marker> From<u64> for Snowflake<M> {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl<M: Marker> fmt::Debug for Snowflake<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", M::NAME, self.id)
    }
}

impl<M: Marker> fmt::Display for Snowflake<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl<M: Marker> FromStr for Snowflake<M> {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self::new)
    }
}

impl<M: Marker> Serialize for Snowflake<M> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&self.id)
    }
}

impl<'de, M: Marker> Deserialize<'de> for Snowflake<M> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor<M>(PhantomData<M>);

        impl<M: Marker> serde::de::Visitor<'_> for SnowflakeVisitor<M> {
            type Value = Snowflake<M>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a snowflake as a decimal string or integer")
            }

            #[inline]
            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Snowflake::new(v))
            }

            #[inline]
            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(Snowflake::new)
                    .map_err(|_| E::custom(format!("negative {}: {v}", M::NAME)))
            }

            #[inline]
            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse()
                    .map_err(|e| E::custom(format!("invalid {} {v:?}: {e}", M::NAME)))
            }
        }

        d.deserialize_any(SnowflakeVisitor(PhantomData))
    }
}
