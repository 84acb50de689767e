//! autoqa-daemon - AutoQA event daemon
//!
//! Reads provider events as newline-delimited JSON
//! [`EventRecord`](autoqa_core::events::EventRecord)s on stdin, writes one
//! JSON acknowledgement per line to stdout, and runs the pipeline work in the
//! background. On end of input or Ctrl-C, queued work is drained before
//! exit.
//!
//! A webhook receiver (or a replay tool) sits in front of the daemon and
//! verifies signatures before forwarding records.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use autoqa_core::checklist::ChecklistExtractor;
use autoqa_core::clock::{Clock, SystemClock};
use autoqa_core::config::AutoQaConfig;
use autoqa_core::events::EventRecord;
use autoqa_core::store::{InMemoryStore, Store};
use autoqa_daemon::enrichment::enricher_from_config;
use autoqa_daemon::github::forge_from_config;
use autoqa_daemon::pipeline::Pipeline;
use autoqa_daemon::queue::WorkQueue;
use autoqa_daemon::router::{Ack, EventRouter};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// autoqa daemon - checklist, manifest and compliance automation
#[derive(Parser, Debug)]
#[command(name = "autoqa-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file (defaults apply when omitted)
    #[arg(short, long, env = "AUTOQA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directives (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        // Stdout carries acknowledgements.
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AutoQaConfig> {
    let mut config = match path {
        Some(path) => AutoQaConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AutoQaConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn write_ack(ack: &Ack) -> Result<()> {
    let line = serde_json::to_string(ack).context("failed to encode acknowledgement")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("failed to write acknowledgement")?;
    stdout.flush().context("failed to flush stdout")
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(args.config.as_ref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let forge = Arc::new(
        forge_from_config(&config.github, Arc::clone(&clock))
            .context("failed to configure the GitHub provider")?,
    );
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let enricher =
        enricher_from_config(&config.enrichment).context("failed to configure enrichment")?;
    let extractor = ChecklistExtractor::new(enricher);
    info!(
        enricher = extractor.enricher_name(),
        auto_merge = config.merge.auto_merge,
        max_concurrency = config.queue.max_concurrency,
        "starting autoqa daemon"
    );

    let pipeline = Arc::new(
        Pipeline::from_config(&config, forge, Arc::clone(&store), clock, extractor)
            .context("failed to build pipeline")?,
    );
    let queue = Arc::new(WorkQueue::new(config.queue.max_concurrency));
    let router = EventRouter::new(store, Arc::clone(&queue), pipeline);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, draining queued work");
                break;
            },
        };
        let Some(line) = line else {
            info!("end of input, draining queued work");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let ack = match serde_json::from_str::<EventRecord>(&line) {
            Ok(record) => match router.route(&record) {
                Ok(ack) => ack,
                Err(e) => {
                    error!(error = %e, "delivery ledger unavailable");
                    Ack::Malformed {
                        reason: format!("ledger unavailable: {e}"),
                    }
                },
            },
            Err(e) => {
                warn!(error = %e, "unreadable event record");
                Ack::Malformed {
                    reason: format!("unreadable event record: {e}"),
                }
            },
        };
        write_ack(&ack)?;
    }

    queue.drain().await;
    info!("autoqa daemon stopped");
    Ok(())
}
