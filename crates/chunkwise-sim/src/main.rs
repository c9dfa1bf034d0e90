#![doc = include_str!("../README.md")]

mod sim;

use chunkwise::{
    ChunkingFilter, Error, GuildId, InMemoryMemberCache, Intents, Member, MemberChunkingManager,
    Shard, ShardSet,
};
use clap::Parser;
use futures::future::join_all;
use sim::config::{CliArgs, SimConfig};
use sim::responder::{SimShard, gateway_events, respond};
use sim::roster::{Roster, Rosters};
use sim::telemetry::init_tracing;
use std::sync::Arc;
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Buffered dispatches between the simulated shards and the dispatcher.
const EVENT_BUFFER: usize = 1024;

/// How many members the streaming demo reads before it cancels.
const STREAM_PREVIEW: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = SimConfig::try_from(args)?;

    init_tracing()?;
    log_startup_info(&config);

    let rosters = Arc::new(Rosters::generate(config.guilds, config.members));

    let mut intents = Intents::GUILDS | Intents::GUILD_MEMBERS;
    if config.presences {
        intents |= Intents::GUILD_PRESENCES;
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut shards: Vec<Arc<dyn Shard>> = Vec::with_capacity(config.shards as usize);
    for id in 0..config.shards {
        let (shard, frames) = SimShard::new(id, intents);
        shards.push(Arc::new(shard));
        tokio::spawn(respond(
            id,
            frames,
            Arc::clone(&rosters),
            events_tx.clone(),
            config.clone(),
        ));
    }
    drop(events_tx);

    let cache = Arc::new(InMemoryMemberCache::default());
    let manager = MemberChunkingManager::new(
        Arc::new(ShardSet::new(shards)),
        cache.clone(),
        config.chunking.clone(),
    )?
    .with_chunking_filter(ChunkingFilter::exclude(config.exclude.iter().copied()));

    let shutdown = CancellationToken::new();
    let dispatch = {
        let dispatcher = manager.dispatcher();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(gateway_events(events_rx), shutdown).await })
    };

    let cancel = CancellationToken::new();
    tokio::select! {
        () = exercise(&manager, &rosters, &config, &cancel) => {}
        () = ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, cancelling outstanding requests");
            cancel.cancel();
            let cancelled = manager.shutdown();
            tracing::info!(cancelled, "Outstanding requests cancelled");
        }
    }

    shutdown.cancel();
    dispatch.await?;

    tracing::info!(
        stats = ?manager.dispatcher().stats(),
        cached = cache.len(),
        "Simulation finished"
    );
    Ok(())
}

fn log_startup_info(config: &SimConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting simulation with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting simulation with {} shards, {} guilds of {} members",
            config.shards,
            config.guilds,
            config.members
        );
    }
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::warn!("Failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}

/// Runs every request shape against every guild the chunking filter selects,
/// all concurrently.
async fn exercise(
    manager: &MemberChunkingManager,
    rosters: &Rosters,
    config: &SimConfig,
    cancel: &CancellationToken,
) {
    let guilds = rosters
        .iter()
        .filter(|roster| manager.chunking_filter().should_chunk(roster.guild_id()));
    join_all(guilds.map(|roster| exercise_guild(manager, roster, config, cancel))).await;
}

async fn exercise_guild(
    manager: &MemberChunkingManager,
    roster: &Roster,
    config: &SimConfig,
    cancel: &CancellationToken,
) {
    let guild_id = roster.guild_id();

    // A couple of known members and one id that is not in the guild.
    let mut user_ids: Vec<_> = roster.members().iter().take(2).map(|m| m.user.id).collect();
    user_ids.push(chunkwise::UserId::new(guild_id.get() ^ 1));

    let (all, by_ids, by_query, humans, preview) = tokio::join!(
        manager.request_all_members(guild_id),
        manager.request_members(guild_id, user_ids),
        manager.request_members_with_query_ctx(
            guild_id,
            config.query.as_str(),
            config.query_limit,
            cancel
        ),
        manager.request_members_with_filter(guild_id, |m: &Member| !m.user.bot),
        stream_preview(manager, guild_id),
    );

    report(guild_id, "all", all);
    report(guild_id, "by_ids", by_ids);
    report(guild_id, "by_query", by_query);
    report(guild_id, "humans", humans);
    report(guild_id, "stream_preview", preview);
}

/// Reads the first few members of a full-guild stream and cancels the rest.
async fn stream_preview(
    manager: &MemberChunkingManager,
    guild_id: GuildId,
) -> chunkwise::Result<Vec<Member>> {
    let mut stream = manager.request_all_members_stream(guild_id).await?;
    let mut preview = Vec::with_capacity(STREAM_PREVIEW);
    while preview.len() < STREAM_PREVIEW {
        match stream.recv().await {
            Some(member) => preview.push(member),
            None => break,
        }
    }
    stream.cancel();
    Ok(preview)
}

fn report(guild_id: GuildId, shape: &str, result: chunkwise::Result<Vec<Member>>) {
    match result {
        Ok(members) => {
            let sample: Vec<&str> = members.iter().take(3).map(Member::display_name).collect();
            tracing::info!(%guild_id, shape, count = members.len(), ?sample, "Request completed");
        }
        Err(Error::Cancelled) => tracing::info!(%guild_id, shape, "Request cancelled"),
        Err(e) => tracing::warn!(%guild_id, shape, "Request failed: {e}"),
    }
}
