use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the catalogcache binary.
#[derive(Debug, Parser)]
#[command(name = "catalogcache", version, about = "Catalog result cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CATALOGCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay a JSON lines operation log against an in-memory catalog.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Operation log, one JSON object per line.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
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

    /// Enable or disable the result cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache entry lifetime.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the breaker cool-down after a backend failure.
    #[arg(long = "cache-retry-interval-seconds", value_name = "SECONDS")]
    pub cache_retry_interval_seconds: Option<u64>,

    /// Override the identical-write debounce window.
    #[arg(long = "cache-write-debounce-seconds", value_name = "SECONDS")]
    pub cache_write_debounce_seconds: Option<u64>,

    /// Override the consecutive-miss limit per key.
    #[arg(long = "cache-miss-streak-limit", value_name = "COUNT")]
    pub cache_miss_streak_limit: Option<u32>,

    /// Override the catalog scope path.
    #[arg(long = "catalog-scope", value_name = "PATH")]
    pub catalog_scope: Option<String>,
}
