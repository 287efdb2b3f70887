//! CLI surface and the validated runtime configuration derived from it.

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "memcached")]
pub struct Cli {
    /// TCP port to listen on.
    #[clap(short = 'p', long, default_value = "11211")]
    pub port: u16,

    /// Number of storage shards. Defaults to the number of logical cores.
    #[clap(long)]
    pub shards: Option<usize>,

    /// Maximum key length in bytes.
    #[clap(long, default_value_t = Config::DEFAULT_MAX_KEY_LEN)]
    pub max_key_len: usize,

    /// Maximum value size in bytes.
    #[clap(long, default_value_t = Config::DEFAULT_MAX_VALUE_LEN)]
    pub max_value_len: u32,

    /// Maximum number of keys (work items) a single `get` may fan out into.
    #[clap(long, default_value_t = Config::DEFAULT_MAX_OPS_IN_REQUEST)]
    pub max_ops_in_request: usize,

    /// Maximum size in bytes of a single rendered reply.
    #[clap(long, default_value_t = Config::DEFAULT_MAX_RESPONSE_LEN)]
    pub max_response_len: usize,

    /// Maximum total bytes of value data a single shard's cache will hold.
    #[clap(long, default_value_t = Config::DEFAULT_SHARD_CAPACITY_BYTES)]
    pub shard_capacity_bytes: u64,
}

/// Parsing limits consulted by the lexer/parser while decoding commands. Carried
/// separately from `Config` so the pure parser module has no dependency on CLI
/// plumbing.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_key_len: usize,
    pub max_value_len: u32,
    pub max_ops_in_request: usize,
    pub max_response_len: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub shards: usize,
    pub limits: Limits,
    pub shard_capacity_bytes: u64,
}

impl Config {
    pub const DEFAULT_MAX_KEY_LEN: usize = 250;
    pub const DEFAULT_MAX_VALUE_LEN: u32 = 1024 * 1024;
    pub const DEFAULT_MAX_OPS_IN_REQUEST: usize = 32;
    pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024 * 1024;
    pub const DEFAULT_SHARD_CAPACITY_BYTES: u64 = 256 * 1024 * 1024;

    pub fn from_cli(cli: Cli) -> Config {
        let shards = cli.shards.unwrap_or_else(num_cpus::get).max(1);
        Config {
            port: cli.port,
            shards,
            limits: Limits {
                max_key_len: cli.max_key_len,
                max_value_len: cli.max_value_len,
                max_ops_in_request: cli.max_ops_in_request,
                max_response_len: cli.max_response_len,
            },
            shard_capacity_bytes: cli.shard_capacity_bytes,
        }
    }
}
