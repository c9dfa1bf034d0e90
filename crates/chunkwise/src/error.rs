//! Error types for member chunking.
//!
//! ## Error Cases
//! - `MissingIntent`: the shard was not identified with the intent the request
//!   needs. Nothing was registered or sent.
//! - `ShardNotFound`: no shard is responsible for the guild.
//! - `InvalidRequest`: the request was rejected before registration.
//! - `NonceExhausted`: every sampled nonce was already in flight.
//! - `SendFailed`: the command could not be handed to the shard. The pending
//!   request has already been rolled back.
//! - `Cancelled`: the caller's cancellation fired before the last chunk.
//! - `TimedOut`: the configured request timeout elapsed before the last chunk.
//! - `Decode`: an inbound or outbound payload did not match its schema.

use crate::{GuildId, Intents};
use core::time::Duration;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for member chunking.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The shard lacks an intent the request requires.
    #[error("Missing intent: {intent}")]
    MissingIntent { intent: Intents },

    /// No connected shard is responsible for the guild.
    #[error("No shard for guild {guild_id}")]
    ShardNotFound { guild_id: GuildId },

    /// The request was malformed or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// No unused nonce was found within the resample budget. Nothing was
    /// registered or sent.
    #[error("No free nonce after {attempts} attempts")]
    NonceExhausted { attempts: usize },

    /// The shard failed to send the command.
    #[error("Send failed: {0}")]
    SendFailed(#[from] TransportError),

    /// The request was cancelled before all chunks arrived.
    #[error("Request cancelled")]
    Cancelled,

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {after:?}")]
    TimedOut { after: Duration },

    /// A gateway payload could not be encoded or decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure reported by a [`Shard`](crate::Shard) when sending a command.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("Transport error: {context}")]
pub struct TransportError {
    pub context: String,
}

impl TransportError {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}
