//! CLI argument definitions

use std::path::PathBuf;

use clap::Parser;

/// lintbridge - analysis bridge server
#[derive(Parser, Debug)]
#[command(name = "lintbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on (0 picks an ephemeral port)
    #[arg(env = "LINTBRIDGE_PORT", default_value_t = 0)]
    pub port: u16,

    /// Host to listen on
    #[arg(env = "LINTBRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Base working directory
    #[arg(env = "LINTBRIDGE_WORKDIR")]
    pub work_dir: Option<PathBuf>,

    /// Parse JavaScript files with the TypeScript parser
    #[arg(long, env = "LINTBRIDGE_TS_PARSER_FOR_JS")]
    pub ts_parser_for_js: bool,

    /// IDE mode: skip expensive metrics
    #[arg(long, env = "LINTBRIDGE_LIGHTWEIGHT")]
    pub lightweight: bool,

    /// Log memory usage around program construction
    #[arg(long, env = "LINTBRIDGE_DEBUG_MEMORY")]
    pub debug_memory: bool,

    /// Additional rule bundles, comma separated
    #[arg(long, env = "LINTBRIDGE_RULE_BUNDLES", value_delimiter = ',')]
    pub rule_bundles: Vec<PathBuf>,

    /// Number of analysis workers
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 300_000)]
    pub timeout_ms: u64,

    /// Grace period for in-flight requests on shutdown, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub shutdown_grace_ms: u64,

    /// Enable verbose output
    #[arg(short, long, env = "LINTBRIDGE_VERBOSE")]
    pub verbose: bool,
}
