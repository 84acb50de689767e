//! Markdown rendering of compliance reports.

use std::fmt::Write as _;

use crate::forge::{CheckConclusion, CheckRunOutput};
use crate::model::{ComplianceReport, ItemStatus};

/// Unmapped outcomes listed before the rest are summarized.
const MAX_UNMAPPED_LISTED: usize = 20;

/// Hidden marker identifying the comment for one report version.
#[must_use]
pub fn report_marker(report: &ComplianceReport) -> String {
    format!(
        "<!-- autoqa:report {} {} v{} -->",
        report.pr_id, report.head_commit, report.version
    )
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

/// Renders the pull request comment for a stored report.
#[must_use]
pub fn render_report_comment(report: &ComplianceReport) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "{}", report_marker(report));
    let _ = writeln!(body, "## AutoQA Compliance Report (v{})\n", report.version);
    let _ = writeln!(
        body,
        "Commit `{}`: score **{:.0}%** ({}/{} required items passed)\n",
        short_sha(&report.head_commit),
        report.score * 100.0,
        report.required_passed,
        report.required_total,
    );

    if report.items.is_empty() {
        body.push_str("No checklist is linked to this pull request.\n");
    } else {
        body.push_str("| Item | Status | Required | Description | Evidence |\n");
        body.push_str("|------|--------|----------|-------------|----------|\n");
        for verdict in &report.items {
            let status = match verdict.status {
                ItemStatus::Passed => "passed",
                ItemStatus::Failed => "**failed**",
                ItemStatus::Pending => "pending",
            };
            let evidence: Vec<String> = verdict
                .evidence
                .iter()
                .map(|key| format!("`{}`", escape_cell(&key.to_string())))
                .collect();
            let _ = writeln!(
                body,
                "| {} | {status} | {} | {} | {} |",
                verdict.item_id,
                if verdict.required { "yes" } else { "no" },
                escape_cell(&verdict.description),
                evidence.join(", "),
            );
        }
    }

    if !report.unmapped_outcomes.is_empty() {
        let _ = writeln!(
            body,
            "\n<details>\n<summary>Unmapped outcomes ({})</summary>\n",
            report.unmapped_outcomes.len()
        );
        for outcome in report.unmapped_outcomes.iter().take(MAX_UNMAPPED_LISTED) {
            let _ = write!(body, "- `{}` ({})", outcome.key, outcome.status);
            if let Some(message) = &outcome.failure_message {
                let first_line = message.lines().next().unwrap_or_default();
                let _ = write!(body, ": {first_line}");
            }
            body.push('\n');
        }
        let hidden = report
            .unmapped_outcomes
            .len()
            .saturating_sub(MAX_UNMAPPED_LISTED);
        if hidden > 0 {
            let _ = writeln!(body, "- ... and {hidden} more");
        }
        body.push_str("\n</details>\n");
    }
    body
}

/// Check-run conclusion and output for a report.
#[must_use]
pub fn check_summary(report: &ComplianceReport) -> (CheckConclusion, CheckRunOutput) {
    let conclusion = if report.has_failed_required() {
        CheckConclusion::Failure
    } else if report.is_fully_compliant() {
        CheckConclusion::Success
    } else {
        CheckConclusion::Neutral
    };
    let title = format!(
        "{}/{} required checklist items passed",
        report.required_passed, report.required_total
    );
    (
        conclusion,
        CheckRunOutput {
            title,
            summary: render_report_comment(report),
        },
    )
}
