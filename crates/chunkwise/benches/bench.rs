use chunkwise::{
    ChunkingConfig, GatewayCommand, GuildId, GuildMembersChunk, Intents, Member,
    MemberChunkingManager, NoCache, NonceSource, PendingRequest, Registry, Shard, ShardSet,
    ThreadNonce, TransportError, User, UserId,
};
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Builder;

// Requests registered per benchmark iteration.
const TOTAL_REQUESTS: usize = 4096;

// Members carried by each chunk in the dispatch benchmark.
const CHUNK_SIZE: usize = 1000;

const GUILD: GuildId = GuildId::new(81_384_788_765_712_384);

/// Accepts every command without doing anything.
struct NullShard;

#[async_trait::async_trait]
impl Shard for NullShard {
    fn shard_id(&self) -> u32 {
        0
    }

    fn intents(&self) -> Intents {
        Intents::GUILD_MEMBERS
    }

    async fn send(&self, _command: GatewayCommand) -> Result<(), TransportError> {
        Ok(())
    }
}

fn members(n: usize) -> Vec<Member> {
    (0..n as u64)
        .map(|i| Member {
            guild_id: GUILD,
            user: User {
                id: UserId::new(i),
                username: format!("user{i}"),
                global_name: None,
                bot: false,
            },
            nick: None,
            roles: Vec::new(),
            joined_at: String::new(),
        })
        .collect()
}

fn bench_nonce_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("nonce");
    group.throughput(Throughput::Elements(1));

    for len in [8, 32] {
        let nonces = ThreadNonce::new(len);
        group.bench_function(format!("sample/len{len}"), |b| {
            b.iter(|| black_box(nonces.sample()));
        });
    }

    group.finish();
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(TOTAL_REQUESTS as u64));

    group.bench_function(format!("register_with/elems/{TOTAL_REQUESTS}"), |b| {
        b.iter(|| {
            let registry = Registry::new(ThreadNonce::default());
            let mut keep = Vec::with_capacity(TOTAL_REQUESTS);
            for _ in 0..TOTAL_REQUESTS {
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let request = registry
                    .register_with(|nonce| PendingRequest::new(nonce, GUILD, None, tx))
                    .unwrap();
                keep.push((request, rx));
            }
            black_box(keep)
        });
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let runtime = Builder::new_current_thread().enable_all().build().unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(CHUNK_SIZE as u64));

    group.bench_function(format!("chunk/elems/{CHUNK_SIZE}"), |b| {
        b.to_async(&runtime).iter_batched(
            || {
                let manager = MemberChunkingManager::new(
                    Arc::new(ShardSet::single(Arc::new(NullShard))),
                    Arc::new(NoCache),
                    ChunkingConfig::default().with_sink_capacity(CHUNK_SIZE),
                )
                .unwrap();
                (manager, members(CHUNK_SIZE))
            },
            |(manager, members)| async move {
                let mut stream = manager.request_all_members_stream(GUILD).await.unwrap();
                let chunk = GuildMembersChunk {
                    guild_id: GUILD,
                    members,
                    chunk_index: 0,
                    chunk_count: 1,
                    not_found: Vec::new(),
                    nonce: Some(stream.nonce().to_owned()),
                };
                manager.dispatcher().handle_chunk(chunk).await;
                while let Some(member) = stream.recv().await {
                    black_box(member);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_nonce_sampling,
    bench_registration,
    bench_dispatch,
);
criterion_main!(benches);
