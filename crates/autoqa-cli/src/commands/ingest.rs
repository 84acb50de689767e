//! `autoqa ingest`: JUnit XML reports to CI results.

use std::path::PathBuf;

use anyhow::Result;
use autoqa_core::ingest::{bind_results, ingest_reports};
use chrono::Utc;
use clap::Args;

use super::{exit_codes, read_bytes, write_json};

/// Arguments for `autoqa ingest`.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// JUnit XML report files from one CI run; none yields the
    /// missing-report diagnostic
    pub reports: Vec<PathBuf>,

    /// Head commit the run tested
    #[arg(long)]
    pub head: String,

    /// Pull request number
    #[arg(long, default_value_t = 1)]
    pub pr: u64,

    /// Repository (`owner/name`)
    #[arg(long, default_value = "local/repo")]
    pub repo: String,

    /// CI run id
    #[arg(long)]
    pub run_id: Option<u64>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the command.
///
/// Unreadable reports do not fail the command; they become error outcomes.
pub fn run(args: &IngestArgs) -> Result<u8> {
    let mut files = Vec::with_capacity(args.reports.len());
    for path in &args.reports {
        files.push((path.display().to_string(), read_bytes(path)?));
    }

    let outcomes = ingest_reports(
        files
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
    );
    let results = bind_results(
        &args.repo,
        args.pr,
        &args.head,
        args.run_id,
        outcomes,
        Utc::now(),
    );
    tracing::info!(
        reports = files.len(),
        outcomes = results.outcomes.len(),
        "reports ingested"
    );

    write_json(&results, args.output.as_deref())?;
    Ok(exit_codes::SUCCESS)
}
