// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Every engine option can come from three places, in increasing priority:
//   1. built-in defaults
//   2. a TOML file given with --config
//   3. command-line flags
// =============================================================================

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use depthcrawl::{EngineConfig, SchedulerKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "depthcrawl",
    version,
    about = "A depth-bounded web crawler",
    long_about = "depthcrawl fetches pages starting from one or more seed URLs, follows links \
                  on the same domain up to a maximum depth, and prints one JSON record per page."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log every scheduling decision (same as RUST_LOG=depthcrawl=debug)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from seed URLs, printing one JSON item per page to stdout
    ///
    /// Example: depthcrawl crawl https://example.com --max-depth 2 --workers 4
    Crawl(CrawlArgs),
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Seed URLs (each one is crawled within its own domain)
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// TOML file with engine options; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Requests per second across all workers (0 = unlimited)
    #[arg(long)]
    pub qps: Option<u32>,

    /// Maximum crawl depth (1 = just the seeds, 0 = unlimited)
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Proxy URL; repeat to rotate through several
    #[arg(long = "proxy", value_name = "URL")]
    pub proxies: Vec<String>,

    /// Send a fixed User-Agent instead of a random browser one
    #[arg(long)]
    pub no_random_user_agent: bool,

    /// How tasks are matched with workers
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerKind>,

    /// Retries for failed fetches (network errors, 429, 5xx)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Also print crawl events (failures, duplicates, ...) as JSON to stderr
    #[arg(long)]
    pub events: bool,
}

impl CrawlArgs {
    /// Merges the config file (if any) with the command-line flags.
    pub fn to_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(qps) = self.qps {
            config.qps = qps;
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        if !self.proxies.is_empty() {
            config.proxies = self.proxies.clone();
        }
        if self.no_random_user_agent {
            config.random_user_agent = false;
        }
        if let Some(scheduler) = self.scheduler {
            config.scheduler = scheduler;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }

        Ok(config)
    }
}
