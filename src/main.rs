//! Lit-Harvest main entry point
//!
//! This is the command-line interface for the Lit-Harvest dispatcher.

use anyhow::Context;
use clap::{Parser, Subcommand};
use lit_harvest::completion::process_requests;
use lit_harvest::config::{load_config_with_hash, Config};
use lit_harvest::crawler::run_crawl;
use lit_harvest::output::replay::{compact_log, failed_requests, successful_records, write_requests};
use lit_harvest::output::{load_statistics, print_statistics};
use lit_harvest::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Lit-Harvest: rate-limited bulk article and completion harvesting
///
/// Every workload runs through the same dispatcher: admission against a
/// per-minute quota, retries with a cool-down after throttling, and an
/// escalation file for whatever could not be finished.
#[derive(Parser, Debug)]
#[command(name = "lit-harvest")]
#[command(version)]
#[command(about = "Rate-limited, retrying bulk harvester", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download articles from the configured sites
    Crawl {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Article list, one DOI or URL per line
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Re-fetch articles the ledger already has as downloaded
        #[arg(long)]
        fresh: bool,
    },

    /// Send a JSONL file of requests to the completion endpoint
    Complete {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// JSONL request file
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Skip the cost probe and run with the configured limits only
        #[arg(long)]
        no_probe: bool,
    },

    /// Inspect an outcome log
    Replay {
        /// JSONL outcome log
        #[arg(value_name = "LOG")]
        log: PathBuf,

        /// Write requests that never succeeded to this file
        #[arg(long, value_name = "FILE")]
        failed_out: Option<PathBuf>,

        /// Rewrite the log keeping only the first success of each request
        #[arg(long)]
        compact: bool,
    },

    /// Show statistics from the harvest ledger
    Stats {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Validate the configuration and print it
    Check {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Crawl {
            config,
            input,
            fresh,
        } => handle_crawl(&config, &input, fresh).await,
        Command::Complete {
            config,
            input,
            no_probe,
        } => handle_complete(&config, &input, !no_probe).await,
        Command::Replay {
            log,
            failed_out,
            compact,
        } => handle_replay(&log, failed_out.as_deref(), compact),
        Command::Stats { config } => handle_stats(&config),
        Command::Check { config } => handle_check(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("lit_harvest=info,warn"),
            1 => EnvFilter::new("lit_harvest=debug,info"),
            2 => EnvFilter::new("lit_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads and validates the configuration, logging its hash
fn load(path: &Path) -> anyhow::Result<(Config, String)> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok((config, hash))
}

/// Handles the crawl subcommand
async fn handle_crawl(config_path: &Path, input: &Path, fresh: bool) -> anyhow::Result<()> {
    let (config, hash) = load(config_path)?;
    if config.sites.is_empty() {
        tracing::warn!("No [[site]] entries configured; every article will be escalated");
    }
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previously downloaded articles)");
    }

    let summary_path = config.output.summary_path.clone();
    let escalation_path = config.output.escalation_path.clone();
    let report = run_crawl(config, &hash, input, fresh)
        .await
        .context("Crawl failed")?;

    let totals = report.summary.totals();
    println!(
        "Downloaded {} of {} article(s); {} escalated to {}",
        totals.succeeded,
        report.summary.total_articles,
        report.escalated.len(),
        escalation_path
    );
    for site in report.summary.halted_sites() {
        println!("  site halted: {}", site);
    }
    println!("Summary written to {}", summary_path);

    if report.interrupted {
        anyhow::bail!("Crawl interrupted");
    }
    Ok(())
}

/// Handles the complete subcommand
async fn handle_complete(config_path: &Path, input: &Path, use_probe: bool) -> anyhow::Result<()> {
    let (config, _hash) = load(config_path)?;
    let output = PathBuf::from(&config.output.log_path);

    let report = process_requests(&config, input, &output, use_probe)
        .await
        .context("Processing requests failed")?;

    println!(
        "Completed {} of {} request(s) in {:.1}s ({} throttled, {} escalated)",
        report.stats.succeeded,
        report.stats.started,
        report.elapsed.as_secs_f64(),
        report.stats.rate_limit_hits,
        report.escalated.len()
    );
    if let Some(average) = report.calibrated_completion {
        println!("Calibrated completion cost: {:.1} tokens per request", average);
    }
    println!("Outcomes appended to {}", output.display());

    if let Some(reason) = report.halt_reason {
        anyhow::bail!("Run halted: {}", reason);
    }
    Ok(())
}

/// Handles the replay subcommand
fn handle_replay(log: &Path, failed_out: Option<&Path>, compact: bool) -> anyhow::Result<()> {
    let successes = successful_records(log)
        .with_context(|| format!("Failed to read {}", log.display()))?;
    let failed = failed_requests(log)?;

    println!("Log: {}", log.display());
    println!("  Succeeded requests: {}", successes.len());
    println!("  Failed requests: {}", failed.len());

    if let Some(path) = failed_out {
        write_requests(path, &failed)?;
        println!("✓ {} failed request(s) written to {}", failed.len(), path.display());
    }

    if compact {
        let report = compact_log(log)?;
        println!(
            "✓ Compacted: kept {}, dropped {} failed and {} duplicate record(s)",
            report.kept, report.dropped_failed, report.dropped_duplicates
        );
    }

    Ok(())
}

/// Handles the stats subcommand: shows statistics from the ledger
fn handle_stats(config_path: &Path) -> anyhow::Result<()> {
    let (config, _hash) = load(config_path)?;

    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the check subcommand: validates and prints the configuration
fn handle_check(config_path: &Path) -> anyhow::Result<()> {
    let (config, hash) = load(config_path)?;

    println!("=== Lit-Harvest Configuration ===\n");
    println!("Hash: {}\n", hash);

    println!("Dispatch:");
    println!("  Max concurrent: {}", config.dispatch.max_concurrent);
    println!("  Max redo: {}", config.dispatch.max_redo);
    println!("  Cool-down: {}s", config.dispatch.cooldown_seconds);
    println!("  Tick: {}ms", config.dispatch.tick_millis);
    println!("  Request timeout: {}s", config.dispatch.request_timeout_seconds);

    println!("\nCapacity (per minute): {}", config.capacity.limits());
    println!(
        "Probe: {} ({} item(s))",
        if config.probe.enabled { "enabled" } else { "disabled" },
        config.probe.probe_size
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Log: {}", config.output.log_path);
    println!("  Escalations: {}", config.output.escalation_path);
    println!("  Database: {}", config.output.database_path);
    println!("  Summary: {}", config.output.summary_path);
    println!("  Articles: {}", config.output.articles_dir);

    match &config.completion {
        Some(completion) => {
            println!("\nCompletion:");
            println!("  Endpoint: {}", completion.endpoint);
            println!("  Mode: {:?}", completion.mode);
            println!("  API key variable: {}", completion.api_key_env);
        }
        None => println!("\nCompletion: not configured"),
    }

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        println!(
            "  - {} ({}, {} req/min{})",
            site.name,
            site.domain,
            site.requests_per_minute,
            if site.single_session {
                ", single-session"
            } else {
                ""
            }
        );
        if !site.doi_prefixes.is_empty() {
            println!("    DOI prefixes: {}", site.doi_prefixes.join(", "));
        }
        if let Some(template) = &site.url_template {
            println!("    URL template: {}", template);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}
