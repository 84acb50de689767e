//! Unified diff scanning.
//!
//! Only what symbol extraction needs is kept: the file path, whether the file
//! was deleted, and the changed text in order. Changed text is every added
//! line plus the enclosing-declaration context git prints after a hunk
//! header (`@@ -10,4 +10,6 @@ def save(self):`), which names the
//! declaration a modification landed in.

use std::sync::LazyLock;

use regex::Regex;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -\d+(?:,(\d+))? \+\d+(?:,(\d+))? @@ ?(.*)$").expect("static hunk regex")
});

/// Changed text of one file in a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFile {
    /// Path in the head commit (the old path for deletions).
    pub path: String,
    /// File no longer exists in the head commit.
    pub deleted: bool,
    /// Hunk contexts and added lines, without the `+` prefix, in diff order.
    pub changed_lines: Vec<String>,
}

#[derive(Debug, Default)]
struct HunkBudget {
    old: u64,
    new: u64,
}

impl HunkBudget {
    const fn is_open(&self) -> bool {
        self.old > 0 || self.new > 0
    }
}

/// Splits a unified diff into per-file changed text, preserving file order.
///
/// Parsing is lenient: lines outside any recognized structure are ignored and
/// a diff without hunk line counts is still read.
#[must_use]
pub fn parse_unified_diff(diff: &str) -> Vec<DiffFile> {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut old_path: Option<String> = None;
    let mut hunk = HunkBudget::default();

    for line in diff.lines() {
        if hunk.is_open() {
            match line.as_bytes().first() {
                Some(b'+') => {
                    hunk.new = hunk.new.saturating_sub(1);
                    push_changed(&mut files, &line[1..]);
                    continue;
                },
                Some(b'-') => {
                    hunk.old = hunk.old.saturating_sub(1);
                    continue;
                },
                Some(b' ') | None => {
                    hunk.old = hunk.old.saturating_sub(1);
                    hunk.new = hunk.new.saturating_sub(1);
                    continue;
                },
                Some(b'\\') => continue,
                _ => hunk = HunkBudget::default(),
            }
        }

        if line.starts_with("diff --git ") {
            old_path = None;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            old_path = strip_side(rest, "a/");
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let (path, deleted) = match strip_side(rest, "b/") {
                Some(path) => (path, false),
                None => (old_path.clone().unwrap_or_default(), true),
            };
            if !path.is_empty() {
                files.push(DiffFile {
                    path,
                    deleted,
                    changed_lines: Vec::new(),
                });
            }
        } else if let Some(captures) = HUNK_HEADER.captures(line) {
            hunk = HunkBudget {
                old: count(captures.get(1).map(|m| m.as_str())),
                new: count(captures.get(2).map(|m| m.as_str())),
            };
            let context = captures.get(3).map_or("", |m| m.as_str());
            if !context.trim().is_empty() {
                push_changed(&mut files, context);
            }
        } else if line.starts_with('+') {
            push_changed(&mut files, &line[1..]);
        }
    }

    files
}

fn push_changed(files: &mut [DiffFile], text: &str) {
    if let Some(file) = files.last_mut() {
        file.changed_lines.push(text.to_string());
    }
}

/// Strips the `a/` or `b/` side prefix; `None` for `/dev/null`.
fn strip_side(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn count(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.parse().ok()).unwrap_or(1)
}
