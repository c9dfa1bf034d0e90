use crate::{Error, Result};
use core::time::Duration;

/// Default capacity of each request's member channel.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Gateway nonces are limited to 32 bytes.
pub const DEFAULT_NONCE_LEN: usize = 32;

/// Shortest accepted nonce. 62^8 candidates keep resampling rare even with
/// many requests in flight.
pub const MIN_NONCE_LEN: usize = 8;

/// Gateway limit on `user_ids` per request.
pub const DEFAULT_MAX_USER_IDS: usize = 100;

/// Tunables for a [`MemberChunkingManager`](crate::MemberChunkingManager).
///
/// # Backpressure
///
/// `sink_capacity` bounds how many accepted members may sit unread in a
/// request's channel. Once full, the dispatcher waits for that consumer before
/// it handles the next event for *any* request. Consumers must keep reading or
/// cancel (dropping the stream cancels).
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub sink_capacity: usize,
    pub nonce_len: usize,
    /// Applied by the aggregate calls that take no cancellation token.
    pub request_timeout: Option<Duration>,
    pub max_user_ids: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            sink_capacity: DEFAULT_SINK_CAPACITY,
            nonce_len: DEFAULT_NONCE_LEN,
            request_timeout: None,
            max_user_ids: DEFAULT_MAX_USER_IDS,
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub const fn with_sink_capacity(mut self, sink_capacity: usize) -> Self {
        self.sink_capacity = sink_capacity;
        self
    }

    #[must_use]
    pub const fn with_nonce_len(mut self, nonce_len: usize) -> Self {
        self.nonce_len = nonce_len;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_max_user_ids(mut self, max_user_ids: usize) -> Self {
        self.max_user_ids = max_user_ids;
        self
    }

    /// Checks the invariants the manager relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sink_capacity == 0 {
            return Err(Error::InvalidRequest {
                reason: "sink_capacity must be greater than 0".to_string(),
            });
        }
        if !(MIN_NONCE_LEN..=DEFAULT_NONCE_LEN).contains(&self.nonce_len) {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "nonce_len must be within {MIN_NONCE_LEN}..={DEFAULT_NONCE_LEN}, got {}",
                    self.nonce_len
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        ChunkingConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_capacity_and_long_nonces() {
        assert!(ChunkingConfig::default().with_sink_capacity(0).validate().is_err());
        assert!(ChunkingConfig::default().with_nonce_len(0).validate().is_err());
        assert!(ChunkingConfig::default().with_nonce_len(33).validate().is_err());
    }

    #[test]
    fn short_nonces_are_rejected() {
        let short = ChunkingConfig::default().with_nonce_len(MIN_NONCE_LEN - 1);
        assert!(matches!(short.validate(), Err(Error::InvalidRequest { .. })));
        ChunkingConfig::default()
            .with_nonce_len(MIN_NONCE_LEN)
            .validate()
            .unwrap();
    }
}
