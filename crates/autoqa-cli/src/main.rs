//! autoqa - offline AutoQA pipeline runner
//!
//! Runs each pipeline stage over local files and prints the resulting JSON
//! document, so checklists, manifests and reports can be reproduced without
//! a provider:
//!
//! ```text
//! autoqa checklist issue.md                      > checklist.json
//! autoqa manifest pr.diff --head abc --checklist checklist.json > manifest.json
//! autoqa ingest junit/*.xml --pr 12 --head abc   > results.json
//! autoqa reconcile --manifest manifest.json --results results.json \
//!                  --checklist checklist.json    > report.json
//! autoqa gate --report report.json               > decision.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// autoqa - checklist, manifest and compliance tooling
#[derive(Parser, Debug)]
#[command(name = "autoqa")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "AUTOQA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract a versioned checklist from issue text
    Checklist(commands::checklist::ChecklistArgs),

    /// Generate the test manifest for a diff
    Manifest(commands::manifest::ManifestArgs),

    /// Ingest JUnit XML reports into CI results for one head commit
    Ingest(commands::ingest::IngestArgs),

    /// Reconcile CI results against a manifest and checklist
    Reconcile(commands::reconcile::ReconcileArgs),

    /// Evaluate the merge gate for a compliance report
    Gate(commands::gate::GateArgs),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Stdout carries documents.
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = commands::load_config(cli.config.as_deref())?;
    let code = match &cli.command {
        Commands::Checklist(args) => commands::checklist::run(args)?,
        Commands::Manifest(args) => commands::manifest::run(args, &config)?,
        Commands::Ingest(args) => commands::ingest::run(args)?,
        Commands::Reconcile(args) => commands::reconcile::run(args, &config)?,
        Commands::Gate(args) => commands::gate::run(args, &config)?,
    };
    Ok(ExitCode::from(code))
}
