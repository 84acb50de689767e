//! Checklist linkage and linked-issue discovery.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Checklist, TestManifestEntry};
use crate::text::Tokenizer;

static CLOSING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\b\s*:?\s*#(\d+)\b")
        .expect("static closing-keyword regex")
});

static ISSUE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w/&])#(\d+)\b").expect("static reference regex"));

static BRANCH_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[/_-])(?:issues?|fix|bug|gh)?[-_]?(\d+)(?:$|[/_-])")
        .expect("static branch regex")
});

static LABEL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^issue[-_ :#]?(\d+)$").expect("static label regex"));

static ENTRY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(T\d+)\b").expect("static entry-id regex"));

/// Pull request text that may reference the issue it resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkHints<'a> {
    /// Pull request description.
    pub body: &'a str,
    /// Head branch name.
    pub branch: &'a str,
    /// Commit messages, oldest first.
    pub commits: &'a [String],
    /// Label names.
    pub labels: &'a [String],
}

/// Finds the issue a pull request resolves.
///
/// Sources are tried in order: closing keywords in the body (`fixes #12`),
/// any `#N` in the body, the branch name (`issue-12`, `fix/12-x`, `12-x`),
/// `#N` in commit messages, then `issue-N` labels.
#[must_use]
pub fn find_linked_issue(hints: &LinkHints<'_>) -> Option<u64> {
    first_capture(&CLOSING_KEYWORD, hints.body)
        .or_else(|| first_capture(&ISSUE_REFERENCE, hints.body))
        .or_else(|| first_capture(&BRANCH_NUMBER, hints.branch))
        .or_else(|| {
            hints
                .commits
                .iter()
                .find_map(|message| first_capture(&ISSUE_REFERENCE, message))
        })
        .or_else(|| {
            hints
                .labels
                .iter()
                .find_map(|label| first_capture(&LABEL_NUMBER, label.trim()))
        })
}

fn first_capture(regex: &Regex, text: &str) -> Option<u64> {
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|number| *number > 0)
}

/// Significant tokens of an entry: its symbol (or derived name) and path.
#[must_use]
pub fn entry_tokens(entry: &TestManifestEntry, tokenizer: &Tokenizer) -> BTreeSet<String> {
    let symbol = entry.symbol.as_deref().unwrap_or(&entry.derived_name);
    let path = strip_extension(&entry.target_file);
    let mut tokens = tokenizer.tokens(symbol);
    tokens.extend(tokenizer.tokens(path));
    tokens
}

fn strip_extension(path: &str) -> &str {
    match path.rfind('.') {
        Some(dot) if !path[dot..].contains('/') => &path[..dot],
        _ => path,
    }
}

/// Checklist item ids linked to `entry`, in checklist order.
///
/// An item links when its description shares a significant token with the
/// entry, or names the entry's test id or derived name.
#[must_use]
pub fn link_entry(
    entry: &TestManifestEntry,
    checklist: &Checklist,
    tokenizer: &Tokenizer,
) -> Vec<String> {
    let tokens = entry_tokens(entry, tokenizer);
    checklist
        .items
        .iter()
        .filter(|item| {
            references_entry(&item.description, entry)
                || tokenizer
                    .token_list(&item.description)
                    .iter()
                    .any(|token| tokens.contains(token))
        })
        .map(|item| item.id.clone())
        .collect()
}

fn references_entry(description: &str, entry: &TestManifestEntry) -> bool {
    description.contains(&entry.derived_name)
        || ENTRY_ID
            .captures_iter(description)
            .any(|captures| captures.get(1).is_some_and(|m| m.as_str() == entry.test_id))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::ChecklistItem;

    fn checklist(descriptions: &[&str]) -> Checklist {
        Checklist {
            repo: "octo/app".to_string(),
            issue_number: 1,
            version: 1,
            items: descriptions
                .iter()
                .enumerate()
                .map(|(index, description)| ChecklistItem {
                    id: ChecklistItem::id_for_index(index),
                    description: (*description).to_string(),
                    required: true,
                    tags: Vec::new(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    fn entry(test_id: &str, symbol: &str, target: &str) -> TestManifestEntry {
        TestManifestEntry {
            test_id: test_id.to_string(),
            derived_name: format!("test_{symbol}_autoqa"),
            framework: "jest".to_string(),
            target_file: target.to_string(),
            checklist_ids: Vec::new(),
            symbol: Some(symbol.to_string()),
            kind: None,
        }
    }

    #[test]
    fn test_link_by_shared_stemmed_token() {
        let checklist = checklist(&["validate email", "send confirmation"]);
        let tokenizer = Tokenizer::default();
        let linked = link_entry(&entry("T1", "confirmSignup", "src/flow.js"), &checklist, &tokenizer);
        assert_eq!(linked, vec!["C2"]);
    }

    #[test]
    fn test_link_by_path_token_and_explicit_id() {
        let checklist = checklist(&["email sending works", "covered by T2", "unrelated"]);
        let tokenizer = Tokenizer::default();
        let linked = link_entry(&entry("T2", "deliver", "src/email.py"), &checklist, &tokenizer);
        assert_eq!(linked, vec!["C1", "C2"]);
        let linked = link_entry(&entry("T12", "deliver", "src/x.py"), &checklist, &tokenizer);
        assert!(linked.is_empty());
    }

    #[test]
    fn test_find_linked_issue_order() {
        let hints = LinkHints {
            body: "Refs #3, fixes #12",
            ..LinkHints::default()
        };
        assert_eq!(find_linked_issue(&hints), Some(12));

        let hints = LinkHints {
            body: "See #7 and octo/other#9",
            branch: "issue-99",
            ..LinkHints::default()
        };
        assert_eq!(find_linked_issue(&hints), Some(7));

        for (branch, expected) in [
            ("feature/issue-123", Some(123)),
            ("fix/12-login", Some(12)),
            ("12-login", Some(12)),
            ("fix-45", Some(45)),
            ("feature/login", None),
        ] {
            let hints = LinkHints {
                branch,
                ..LinkHints::default()
            };
            assert_eq!(find_linked_issue(&hints), expected, "branch {branch}");
        }
    }

    #[test]
    fn test_find_linked_issue_commits_then_labels() {
        let commits = vec!["wip".to_string(), "closes #8".to_string()];
        let labels = vec!["bug".to_string(), "issue-5".to_string()];
        let hints = LinkHints {
            commits: &commits,
            labels: &labels,
            ..LinkHints::default()
        };
        assert_eq!(find_linked_issue(&hints), Some(8));

        let hints = LinkHints {
            labels: &labels,
            ..LinkHints::default()
        };
        assert_eq!(find_linked_issue(&hints), Some(5));
        assert_eq!(find_linked_issue(&LinkHints::default()), None);
    }
}
