//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::logging::LogFormat;
use crate::pipeline::ReportFormat;

/// pulsechain - run chained HTTP requests with scripts and tests
#[derive(Parser, Debug, Clone)]
#[command(name = "pulsechain", version, about, long_about = None)]
pub struct Args {
    /// Config file (default: <config dir>/pulsechain/config.toml)
    #[arg(long, global = true, value_name = "FILE", env = "PULSECHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Diagnostics format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Environment variable, NAME=VALUE (repeatable). JSON values are parsed.
    #[arg(short = 'e', long = "env", global = true, value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// File of NAME=VALUE lines merged before --env
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Bypass the response cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute a chain file (YAML, JSON or TOML)
    Run {
        /// Chain definition
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Skip the remaining steps after a failed one
        #[arg(long)]
        stop_on_error: bool,

        /// Only validate the chain, do not send anything
        #[arg(long)]
        validate: bool,
    },

    /// Send one request and run a test script against the response
    Test {
        /// Request URL
        #[arg(long)]
        url: String,

        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header, "Name: value" (repeatable)
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Test script file
        #[arg(value_name = "SCRIPT", required_unless_present = "script")]
        file: Option<PathBuf>,

        /// Inline test script
        #[arg(long, conflicts_with = "file")]
        script: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or reset the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Entry counts and hit rate
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry
    Clear,
    /// Remove entries whose key matches a regular expression
    Invalidate {
        /// Pattern, e.g. "example\.com"
        pattern: String,
    },
}
