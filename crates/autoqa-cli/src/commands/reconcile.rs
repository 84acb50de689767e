//! `autoqa reconcile`: manifest, CI results and checklist to a compliance
//! report.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use autoqa_core::config::AutoQaConfig;
use autoqa_core::model::{Checklist, CiRunResults, TestManifest};
use autoqa_core::reconcile::render_report_comment;
use clap::{Args, ValueEnum};

use super::{exit_codes, read_json, read_optional_json, write_json, write_text};

/// Output format of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// The compliance report document.
    #[default]
    Json,
    /// The pull request comment AutoQA would post.
    Markdown,
}

/// Arguments for `autoqa reconcile`.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Test manifest document
    #[arg(long)]
    pub manifest: PathBuf,

    /// CI results document (from `autoqa ingest`)
    #[arg(long)]
    pub results: PathBuf,

    /// Checklist document of the linked issue
    #[arg(long)]
    pub checklist: Option<PathBuf>,

    /// Version stamped on the report
    #[arg(long, default_value_t = 1)]
    pub version: u32,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: ReportFormat,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the command.
pub fn run(args: &ReconcileArgs, config: &AutoQaConfig) -> Result<u8> {
    if args.version == 0 {
        bail!("report versions start at 1");
    }
    let manifest: TestManifest = read_json(&args.manifest)?;
    let results: CiRunResults = read_json(&args.results)?;
    let checklist: Option<Checklist> = read_optional_json(args.checklist.as_ref())?;

    let reconciler = config
        .reconciler()
        .context("invalid [matching] configuration")?;
    let mut report = reconciler
        .reconcile(&manifest, &results, checklist.as_ref())
        .context("results cannot be reconciled against this manifest")?;
    report.version = args.version;
    tracing::info!(
        pr = %report.pr_id,
        score = report.score,
        required_passed = report.required_passed,
        required_total = report.required_total,
        unmapped = report.unmapped_outcomes.len(),
        "report produced"
    );

    match args.format {
        ReportFormat::Json => write_json(&report, args.output.as_deref())?,
        ReportFormat::Markdown => {
            write_text(&render_report_comment(&report), args.output.as_deref())?;
        },
    }
    Ok(exit_codes::SUCCESS)
}
