// src/main.rs
// =============================================================================
// This is the entry point of the depthcrawl CLI.
//
// What happens here:
// 1. Set up logging (stderr, filtered by RUST_LOG)
// 2. Parse command-line arguments using clap
// 3. Build the engine and start a task that prints items as JSON lines
// 4. Crawl until done (or Ctrl-C), then print a summary to stderr
// 5. Exit with proper code (0 = clean crawl, 1 = some fetches failed, 2 = error)
// =============================================================================

mod cli;

use anyhow::{Context as _, Result};
use clap::Parser;
use cli::{Cli, Commands, CrawlArgs};
use depthcrawl::{parsers, CrawlEvent, EngineBuilder, Item, Task};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "depthcrawl=debug"
    } else {
        "depthcrawl=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        // stdout is for items, so logs go to stderr
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Crawl(args) => handle_crawl(args).await,
    }
}

// Handles the 'crawl' subcommand
async fn handle_crawl(args: CrawlArgs) -> Result<i32> {
    let config = args.to_config()?;

    let seeds = args
        .seeds
        .iter()
        .map(|s| -> Result<Task> {
            Url::parse(s).with_context(|| format!("invalid seed URL '{}'", s))?;
            Ok(parsers::seed(s))
        })
        .collect::<Result<Vec<_>>>()?;

    let (item_tx, mut item_rx) = mpsc::channel::<Item>(256);
    let mut builder = EngineBuilder::from_config(&config).pipeline(item_tx);

    let event_printer = if args.events {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        builder = builder.events(event_tx);
        Some(tokio::spawn(print_events(event_rx)))
    } else {
        None
    };

    let engine = builder.build().context("failed to set up crawler")?;

    // One JSON object per line, so the output can be piped into jq & co.
    let item_printer = tokio::spawn(async move {
        while let Some(item) = item_rx.recv().await {
            match serde_json::to_string(&item) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(id = %item.id, error = %e, "could not serialize item"),
            }
        }
    });

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping crawl");
            cancel.cancel();
        }
    });

    let summary = engine.run(seeds).await?;

    // The engine owns the last item/event senders; dropping it lets the
    // printers see end-of-stream and finish.
    drop(engine);
    item_printer.await?;
    if let Some(printer) = event_printer {
        printer.await?;
    }

    eprintln!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed > 0 {
        Ok(1)
    } else {
        Ok(0)
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<CrawlEvent>) {
    while let Some(event) = events.recv().await {
        if let Ok(line) = serde_json::to_string(&event) {
            eprintln!("{}", line);
        }
    }
}
