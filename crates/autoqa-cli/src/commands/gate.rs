//! `autoqa gate`: compliance report and policy to a merge decision.
//!
//! Exits with [`exit_codes::DECLINED`] when the gate declines, so scripts can
//! branch on the result without parsing the decision.

use std::path::PathBuf;

use anyhow::Result;
use autoqa_core::config::AutoQaConfig;
use autoqa_core::forge::ProtectionSnapshot;
use autoqa_core::gate::{GateInput, evaluate};
use autoqa_core::model::ComplianceReport;
use chrono::Utc;
use clap::Args;

use super::{exit_codes, read_json, read_optional_json, write_json};

/// Arguments for `autoqa gate`.
#[derive(Debug, Args)]
pub struct GateArgs {
    /// Compliance report document
    #[arg(long)]
    pub report: PathBuf,

    /// Current head of the pull request (defaults to the report's commit)
    #[arg(long)]
    pub head: Option<String>,

    /// Protection snapshot as JSON (`{"mergeable", "mergeable_state",
    /// "head_sha"}`); absent means not satisfied
    #[arg(long)]
    pub protection: Option<PathBuf>,

    /// The pull request is already merged
    #[arg(long)]
    pub merged: bool,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the command.
pub fn run(args: &GateArgs, config: &AutoQaConfig) -> Result<u8> {
    let report: ComplianceReport = read_json(&args.report)?;
    let protection: ProtectionSnapshot =
        read_optional_json(args.protection.as_ref())?.unwrap_or_default();
    let current_head = args
        .head
        .clone()
        .unwrap_or_else(|| report.head_commit.clone());

    let decision = evaluate(
        &config.merge,
        &GateInput {
            report: &report,
            current_head: &current_head,
            already_merged: args.merged,
            protection: &protection,
        },
        Utc::now(),
    );
    for line in decision.reasoning() {
        tracing::info!(pr = %decision.pr_id, "{line}");
    }

    write_json(&decision, args.output.as_deref())?;
    Ok(if decision.eligible {
        exit_codes::SUCCESS
    } else {
        exit_codes::DECLINED
    })
}
