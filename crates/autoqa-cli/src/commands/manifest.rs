//! `autoqa manifest`: diff and checklist to a test manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use autoqa_core::config::AutoQaConfig;
use autoqa_core::manifest::ManifestInput;
use autoqa_core::model::{ChangedFile, Checklist};
use clap::Args;

use super::{exit_codes, read_optional_json, read_text, write_json};

/// Arguments for `autoqa manifest`.
#[derive(Debug, Args)]
pub struct ManifestArgs {
    /// Unified diff file (`-` reads stdin)
    pub diff: PathBuf,

    /// Head commit the diff belongs to
    #[arg(long)]
    pub head: String,

    /// Pull request number
    #[arg(long, default_value_t = 1)]
    pub pr: u64,

    /// Checklist document of the linked issue
    #[arg(long)]
    pub checklist: Option<PathBuf>,

    /// Changed-file list as JSON (`[{"filename": ..., "status": ...}]`);
    /// removed files are skipped
    #[arg(long)]
    pub files: Option<PathBuf>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the command.
pub fn run(args: &ManifestArgs, config: &AutoQaConfig) -> Result<u8> {
    let diff = read_text(&args.diff)?;
    let checklist: Option<Checklist> = read_optional_json(args.checklist.as_ref())?;
    let files: Vec<ChangedFile> = read_optional_json(args.files.as_ref())?.unwrap_or_default();

    let generator = config
        .manifest_generator()
        .context("invalid [manifest] configuration")?;
    let manifest = generator.generate(&ManifestInput {
        pr_number: args.pr,
        head_sha: &args.head,
        diff: &diff,
        files: &files,
        checklist: checklist.as_ref(),
    });
    tracing::info!(
        head_sha = %manifest.head_sha,
        tests = manifest.tests.len(),
        linked = manifest.tests.iter().filter(|entry| entry.is_linked()).count(),
        "manifest generated"
    );

    write_json(&manifest, args.output.as_deref())?;
    Ok(exit_codes::SUCCESS)
}
