//! Markdown rendering of a checklist comment.

use std::fmt::Write as _;

use crate::model::Checklist;

/// Hidden marker identifying the comment for one checklist version.
///
/// The daemon searches existing comments for this marker before posting, so
/// a retried post never duplicates the comment.
#[must_use]
pub fn checklist_marker(checklist: &Checklist) -> String {
    format!(
        "<!-- autoqa:checklist {}#{} v{} -->",
        checklist.repo, checklist.issue_number, checklist.version
    )
}

/// Renders the issue comment for a checklist version.
#[must_use]
pub fn render_checklist_comment(checklist: &Checklist) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "{}", checklist_marker(checklist));
    let _ = writeln!(body, "## AutoQA Checklist (v{})\n", checklist.version);

    if checklist.items.is_empty() {
        body.push_str("No acceptance criteria were found in the issue description.\n");
        body.push_str("Add a section like the following and edit the issue to regenerate:\n\n");
        body.push_str("```markdown\n## Acceptance Criteria\n- Criterion 1\n- Criterion 2\n```\n");
        return body;
    }

    body.push_str("Generated from the issue description.\n\n");
    for item in &checklist.items {
        let badge = if item.required { "required" } else { "optional" };
        let _ = write!(body, "- [ ] **{}**: {} _({badge})_", item.id, item.description);
        if !item.tags.is_empty() {
            let tags: Vec<String> = item.tags.iter().map(|tag| format!("`{tag}`")).collect();
            let _ = write!(body, " {}", tags.join(" "));
        }
        body.push('\n');
    }

    body.push_str("\n<details>\n<summary>Checklist JSON</summary>\n\n```json\n");
    match serde_json::to_string_pretty(&checklist.items) {
        Ok(json) => body.push_str(&json),
        Err(error) => {
            tracing::warn!(error = %error, "failed to serialize checklist items");
            body.push_str("[]");
        },
    }
    body.push_str("\n```\n\n</details>\n");
    body
}
