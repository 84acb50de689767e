//! `autoqa checklist`: issue text to a checklist document.

use std::path::PathBuf;

use anyhow::{Result, bail};
use autoqa_core::checklist::{extract_items, render_checklist_comment, revise};
use autoqa_core::model::Checklist;
use chrono::Utc;
use clap::{Args, ValueEnum};

use super::{exit_codes, read_optional_json, read_text, write_json, write_text};

/// Output format of the checklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ChecklistFormat {
    /// The checklist document.
    #[default]
    Json,
    /// The issue comment AutoQA would post.
    Markdown,
}

/// Arguments for `autoqa checklist`.
#[derive(Debug, Args)]
pub struct ChecklistArgs {
    /// Issue text file (`-` reads stdin)
    pub issue: PathBuf,

    /// Repository the issue belongs to (`owner/name`)
    #[arg(long, default_value = "local/repo")]
    pub repo: String,

    /// Issue number
    #[arg(long, default_value_t = 1)]
    pub number: u64,

    /// Previous checklist version; a new version is minted only when the
    /// items changed
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: ChecklistFormat,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Runs the command.
pub fn run(args: &ChecklistArgs) -> Result<u8> {
    let text = read_text(&args.issue)?;
    let previous: Option<Checklist> = read_optional_json(args.previous.as_ref())?;
    if let Some(previous) = &previous {
        if previous.repo != args.repo || previous.issue_number != args.number {
            bail!(
                "previous checklist belongs to {}#{}, not {}#{}",
                previous.repo,
                previous.issue_number,
                args.repo,
                args.number
            );
        }
    }

    let revision = revise(
        previous.as_ref(),
        &args.repo,
        args.number,
        extract_items(&text),
        Utc::now(),
    );
    tracing::info!(
        version = revision.checklist().version,
        new_version = revision.is_new_version(),
        items = revision.checklist().items.len(),
        "checklist extracted"
    );

    let checklist = revision.into_checklist();
    match args.format {
        ChecklistFormat::Json => write_json(&checklist, args.output.as_deref())?,
        ChecklistFormat::Markdown => {
            write_text(&render_checklist_comment(&checklist), args.output.as_deref())?;
        },
    }
    Ok(exit_codes::SUCCESS)
}
