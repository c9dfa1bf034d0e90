//! The simulated gateway peer.
//!
//! A [`SimShard`] frames commands into their JSON envelope and hands them to
//! its responder task. The responder answers each member request with one or
//! more `GUILD_MEMBERS_CHUNK` dispatches on the shared event channel, the way
//! the real gateway interleaves replies from every shard on one stream.

use super::{config::SimConfig, roster::Rosters};
use async_trait::async_trait;
use chunkwise::{
    GUILD_MEMBERS_CHUNK, GatewayCommand, GatewayEvent, GuildMembersChunk, Intents,
    OPCODE_REQUEST_GUILD_MEMBERS, RequestGuildMembers, Shard, TransportError,
};
use futures::{Stream, StreamExt, future};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A raw dispatch as read off the wire: event name plus `d` payload.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub kind: String,
    pub data: Value,
}

pub struct SimShard {
    id: u32,
    intents: Intents,
    outbound: mpsc::UnboundedSender<Value>,
}

impl SimShard {
    /// Returns the shard and the receiving end of its outbound frames.
    pub fn new(id: u32, intents: Intents) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (outbound, frames) = mpsc::unbounded_channel();
        (
            Self {
                id,
                intents,
                outbound,
            },
            frames,
        )
    }
}

#[async_trait]
impl Shard for SimShard {
    fn shard_id(&self) -> u32 {
        self.id
    }

    fn intents(&self) -> Intents {
        self.intents
    }

    async fn send(&self, command: GatewayCommand) -> Result<(), TransportError> {
        let frame = command
            .to_payload()
            .map_err(|e| TransportError::new(format!("failed to encode command: {e}")))?;
        tracing::trace!(shard = self.id, %frame, "sending frame");
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::new(format!("shard {} is disconnected", self.id)))
    }
}

/// Answers every member request framed by one shard until the shard is
/// dropped or the event channel closes.
pub async fn respond(
    shard_id: u32,
    mut frames: mpsc::UnboundedReceiver<Value>,
    rosters: Arc<Rosters>,
    events: mpsc::Sender<Dispatch>,
    config: SimConfig,
) {
    while let Some(frame) = frames.recv().await {
        let request = match parse_request(frame) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(shard = shard_id, "dropping malformed frame: {e}");
                continue;
            }
        };

        let Some(roster) = rosters.get(request.guild_id) else {
            tracing::warn!(shard = shard_id, guild_id = %request.guild_id, "unknown guild");
            continue;
        };

        let (members, not_found) = roster.select(&request);
        if let Err(e) = feed_chunks(&request, members, not_found, &events, &config).await {
            tracing::debug!(shard = shard_id, "event channel closed: {e}");
            return;
        }
    }
}

fn parse_request(mut frame: Value) -> serde_json::Result<Option<RequestGuildMembers>> {
    if frame.get("op").and_then(Value::as_u64) != Some(u64::from(OPCODE_REQUEST_GUILD_MEMBERS)) {
        return Ok(None);
    }
    let data = frame.get_mut("d").map(Value::take).unwrap_or_default();
    serde_json::from_value(data).map(Some)
}

/// Splits `members` into chunks of at most `chunk_size` and pushes them onto
/// the event channel in order. An empty result still produces one chunk so
/// the requester learns the request is complete.
async fn feed_chunks(
    request: &RequestGuildMembers,
    members: Vec<chunkwise::Member>,
    not_found: Vec<chunkwise::UserId>,
    events: &mpsc::Sender<Dispatch>,
    config: &SimConfig,
) -> anyhow::Result<()> {
    let chunk_count = members.len().div_ceil(config.chunk_size).max(1);
    let chunk_count = u32::try_from(chunk_count)?;
    let mut members = members.into_iter();
    let mut not_found = Some(not_found);

    for chunk_index in 0..chunk_count {
        let batch: Vec<_> = members.by_ref().take(config.chunk_size).collect();
        let last = chunk_index + 1 == chunk_count;
        let chunk = GuildMembersChunk {
            guild_id: request.guild_id,
            members: batch,
            chunk_index,
            chunk_count,
            not_found: if last {
                not_found.take().unwrap_or_default()
            } else {
                Vec::new()
            },
            nonce: Some(request.nonce.clone()),
        };

        events
            .send(Dispatch {
                kind: GUILD_MEMBERS_CHUNK.to_owned(),
                data: serde_json::to_value(&chunk)?,
            })
            .await?;

        if !last && !config.chunk_delay.is_zero() {
            tokio::time::sleep(config.chunk_delay).await;
        }
    }
    Ok(())
}

/// Decodes raw dispatches into gateway events, dropping (and logging) those
/// that do not parse.
pub fn gateway_events(dispatches: mpsc::Receiver<Dispatch>) -> impl Stream<Item = GatewayEvent> {
    ReceiverStream::new(dispatches).filter_map(|dispatch| {
        future::ready(match GatewayEvent::decode(&dispatch.kind, dispatch.data) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(kind = %dispatch.kind, "failed to decode dispatch: {e}");
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::config::CliArgs;
    use chunkwise::GuildId;
    use clap::Parser;

    fn config(chunk_size: usize) -> SimConfig {
        let chunk_size = chunk_size.to_string();
        let args = CliArgs::try_parse_from([
            "chunkwise-sim",
            "--chunk-size",
            chunk_size.as_str(),
            "--chunk-delay-ms",
            "0",
        ])
        .unwrap();
        SimConfig::try_from(args).unwrap()
    }

    #[tokio::test]
    async fn answers_with_declared_chunk_count() {
        let rosters = Arc::new(Rosters::generate(1, 25));
        let guild_id = rosters.iter().next().unwrap().guild_id();
        let (shard, frames) = SimShard::new(0, Intents::GUILD_MEMBERS);
        let (events, dispatches) = mpsc::channel(16);

        let responder = tokio::spawn(respond(0, frames, rosters, events, config(10)));

        shard
            .send(GatewayCommand::RequestGuildMembers(RequestGuildMembers {
                guild_id,
                query: Some(String::new()),
                limit: Some(0),
                presences: false,
                user_ids: None,
                nonce: "abc".into(),
            }))
            .await
            .unwrap();
        drop(shard);

        let chunks: Vec<GuildMembersChunk> = gateway_events(dispatches)
            .filter_map(|event| {
                future::ready(match event {
                    GatewayEvent::GuildMembersChunk(chunk) => Some(chunk),
                    GatewayEvent::Other { .. } => None,
                })
            })
            .collect()
            .await;
        responder.await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chunk_count == 3));
        assert_eq!(
            chunks.iter().map(|c| c.members.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert!(chunks.iter().all(|c| c.nonce.as_deref() == Some("abc")));
        assert!(chunks.iter().all(|c| c.guild_id == guild_id));
    }

    #[tokio::test]
    async fn empty_result_is_a_single_empty_chunk() {
        let (tx, mut rx) = mpsc::channel(4);
        let request = RequestGuildMembers {
            guild_id: GuildId::new(1),
            query: None,
            limit: None,
            presences: false,
            user_ids: Some(vec![chunkwise::UserId::new(5)]),
            nonce: "n".into(),
        };

        feed_chunks(
            &request,
            Vec::new(),
            vec![chunkwise::UserId::new(5)],
            &tx,
            &config(10),
        )
        .await
        .unwrap();
        drop(tx);

        let dispatch = rx.recv().await.unwrap();
        let GatewayEvent::GuildMembersChunk(chunk) =
            GatewayEvent::decode(&dispatch.kind, dispatch.data).unwrap()
        else {
            panic!("expected a member chunk");
        };
        assert_eq!(chunk.chunk_count, 1);
        assert!(chunk.members.is_empty());
        assert_eq!(chunk.not_found, vec![chunkwise::UserId::new(5)]);
        assert!(rx.recv().await.is_none());
    }
}
