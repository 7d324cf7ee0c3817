use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the sqlcache binary.
#[derive(Debug, Parser)]
#[command(name = "sqlcache", version, about = "Read-through SQL query cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SQLCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the resolved settings.
    Config(ConfigArgs),
    /// Drive a synthetic workload through an in-memory cache and report statistics.
    Probe(ProbeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,

    /// Number of concurrent readers issuing the same query.
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(usize))]
    pub concurrency: usize,

    /// Number of rows the synthetic table holds.
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64))]
    pub rows: u64,
}

impl Default for ProbeArgs {
    fn default() -> Self {
        Self {
            overrides: CacheOverrides::default(),
            concurrency: 32,
            rows: 16,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the entry time-to-live in milliseconds (0 disables expiry).
    #[arg(long = "cache-ttl-ms", value_name = "MILLIS")]
    pub ttl_ms: Option<u64>,

    /// Override the cache level (off|primary|search|all).
    #[arg(long = "cache-level", value_name = "LEVEL")]
    pub level: Option<String>,

    /// Override the key prefix.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX")]
    pub key_prefix: Option<String>,

    /// Override the in-memory backend capacity.
    #[arg(long = "cache-memory-capacity", value_name = "COUNT")]
    pub memory_capacity: Option<u64>,

    /// Toggle per-read debug events.
    #[arg(
        long = "cache-debug",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub debug_mode: Option<bool>,
}
