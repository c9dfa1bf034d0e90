use chunkwise::{ChunkingConfig, DEFAULT_SINK_CAPACITY, GuildId};
use clap::Parser;
use core::time::Duration;

/// Command-line arguments for the simulation.
///
/// Every flag can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Answers member requests from simulated shards with chunked events")]
pub struct CliArgs {
    /// Number of simulated shards.
    #[arg(long, env = "CHUNKWISE_SHARDS", default_value_t = 2)]
    pub shards: u32,

    /// Number of simulated guilds.
    #[arg(long, env = "CHUNKWISE_GUILDS", default_value_t = 4)]
    pub guilds: u64,

    /// Members per guild.
    #[arg(long, env = "CHUNKWISE_MEMBERS", default_value_t = 2_500)]
    pub members: usize,

    /// Members per chunk event. The gateway uses 1000.
    #[arg(long, env = "CHUNKWISE_CHUNK_SIZE", default_value_t = 1_000)]
    pub chunk_size: usize,

    /// Delay between two chunks of the same reply, in milliseconds.
    #[arg(long, env = "CHUNKWISE_CHUNK_DELAY_MS", default_value_t = 5)]
    pub chunk_delay_ms: u64,

    /// Capacity of each request's member channel.
    #[arg(long, env = "CHUNKWISE_SINK_CAPACITY", default_value_t = DEFAULT_SINK_CAPACITY)]
    pub sink_capacity: usize,

    /// Deadline for aggregate requests, in milliseconds. 0 disables it.
    #[arg(long, env = "CHUNKWISE_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Username prefix used by the query request.
    #[arg(long, env = "CHUNKWISE_QUERY", default_value = "al")]
    pub query: String,

    /// Result limit used by the query request.
    #[arg(long, env = "CHUNKWISE_QUERY_LIMIT", default_value_t = 50)]
    pub query_limit: u32,

    /// Identify shards with the presences intent.
    #[arg(long, env = "CHUNKWISE_PRESENCES", default_value_t = false)]
    pub presences: bool,

    /// Guild ids that must not be chunked.
    #[arg(long, env = "CHUNKWISE_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub shards: u32,
    pub guilds: u64,
    pub members: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub query: String,
    pub query_limit: u32,
    pub presences: bool,
    pub exclude: Vec<GuildId>,
    pub chunking: ChunkingConfig,
}

impl TryFrom<CliArgs> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.shards == 0 {
            anyhow::bail!("shards must be greater than 0");
        }
        if args.guilds == 0 {
            anyhow::bail!("guilds must be greater than 0");
        }
        if args.members == 0 {
            anyhow::bail!("members must be greater than 0");
        }
        if args.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }

        let mut chunking = ChunkingConfig::default().with_sink_capacity(args.sink_capacity);
        if args.request_timeout_ms > 0 {
            chunking = chunking.with_request_timeout(Duration::from_millis(args.request_timeout_ms));
        }
        chunking.validate()?;

        Ok(Self {
            shards: args.shards,
            guilds: args.guilds,
            members: args.members,
            chunk_size: args.chunk_size,
            chunk_delay: Duration::from_millis(args.chunk_delay_ms),
            query: args.query,
            query_limit: args.query_limit,
            presences: args.presences,
            exclude: args.exclude.into_iter().map(GuildId::new).collect(),
            chunking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let argv = core::iter::once("chunkwise-sim").chain(extra.iter().copied());
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.chunk_size, 1_000);
        assert_eq!(config.chunking.request_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for flag in ["--shards", "--guilds", "--members", "--chunk-size", "--sink-capacity"] {
            assert!(
                SimConfig::try_from(args(&[flag, "0"])).is_err(),
                "{flag} 0 should be rejected"
            );
        }
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = SimConfig::try_from(args(&["--request-timeout-ms", "0"])).unwrap();
        assert_eq!(config.chunking.request_timeout, None);
    }

    #[test]
    fn exclude_accepts_a_list() {
        let config = SimConfig::try_from(args(&["--exclude", "1,2"])).unwrap();
        assert_eq!(config.exclude, vec![GuildId::new(1), GuildId::new(2)]);
    }
}
