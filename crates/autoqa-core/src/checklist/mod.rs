//! Issue text to acceptance-criteria checklist.
//!
//! # Architecture
//!
//! ```text
//! issue text ──► extract_items (heuristic floor, always runs)
//!                     │
//!                     ├──► Enricher::suggest (optional, degrades silently)
//!                     │          │
//!                     ▼          ▼
//!                 merge_suggestions (adds, never removes)
//!                     │
//!                     ▼
//!                 revise (previous version?) ──► Created | Revised | Unchanged
//! ```
//!
//! # Contracts
//!
//! - Items appear in order of first appearance in the issue text and are
//!   numbered `C1..Cn` in that order.
//! - Byte-identical input yields identical ids and descriptions.
//! - Enrichment never removes or renumbers a heuristic item. With enrichment
//!   disabled the output equals [`extract_items`].

mod enrichment;
mod render;


use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;

pub use enrichment::{Enricher, EnrichmentError, NoopEnricher, SuggestedItem, merge_suggestions};
pub use render::{checklist_marker, render_checklist_comment};

use crate::model::{Checklist, ChecklistItem};

/// Labels that open an acceptance-criteria section (lowercase).
pub const SECTION_LABELS: &[&str] = &[
    "acceptance criteria",
    "acceptance criterion",
    "ac",
    "requirements",
    "definition of done",
    "success criteria",
    "done when",
];

/// Words that make a bullet a criterion when the issue has no section.
pub const REQUIREMENT_KEYWORDS: &[&str] = &["must", "should", "need", "require", "ensure", "verify"];

/// Phrases that mark an item as not required.
pub const OPTIONAL_MARKERS: &[&str] = &["optional", "nice to have", "nice-to-have"];

/// Shortest description kept as an item.
pub const MIN_ITEM_LEN: usize = 3;

/// `(tag, keywords)`; a tag applies when any keyword occurs in the text.
const TAG_RULES: &[(&str, &[&str])] = &[
    ("testing", &["test"]),
    ("validation", &["valid"]),
    ("error-handling", &["error", "exception", "fail"]),
    (
        "security",
        &["auth", "security", "secure", "permission", "password", "token", "encrypt"],
    ),
    (
        "performance",
        &["performance", "latency", "throughput", "fast", "slow", "timeout"],
    ),
];

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+•]|\d+[.)])\s+(.+?)\s*$").expect("static bullet regex")
});

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[ xX]\]\s*").expect("static checkbox regex"));

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}(?:\s|$)").expect("static heading regex"));

static BOLD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\*\*|__)[^*_]+(?:\*\*|__)\s*:?\s*$").expect("static bold regex")
});

static HORIZONTAL_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$")
        .expect("static rule regex")
});

/// Extracts checklist items from issue text with the heuristic rules only.
///
/// Items under every acceptance-criteria section are collected in order.
/// When no section yields an item, bullets containing a requirement keyword
/// are used instead.
#[must_use]
pub fn extract_items(issue_text: &str) -> Vec<ChecklistItem> {
    let mut descriptions = section_bullets(issue_text);
    if descriptions.is_empty() {
        descriptions = keyword_bullets(issue_text);
    }

    let mut seen = HashSet::new();
    descriptions
        .into_iter()
        .filter(|description| description.chars().count() >= MIN_ITEM_LEN)
        .filter(|description| seen.insert(description.to_lowercase()))
        .enumerate()
        .map(|(index, description)| ChecklistItem {
            id: ChecklistItem::id_for_index(index),
            required: !is_optional(&description),
            tags: derive_tags(&description),
            description,
        })
        .collect()
}

fn section_bullets(text: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        if is_section_heading(line) {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(description) = bullet_text(line) {
            bullets.push(description);
        } else if ends_section(line) {
            in_section = false;
        }
    }
    bullets
}

fn keyword_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !HORIZONTAL_RULE.is_match(line))
        .filter_map(bullet_text)
        .filter(|description| {
            let lower = description.to_lowercase();
            REQUIREMENT_KEYWORDS
                .iter()
                .any(|keyword| lower.contains(keyword))
        })
        .collect()
}

/// Returns the label of a heading-like line, normalized to lowercase.
fn heading_label(line: &str) -> String {
    let label = line.trim().trim_start_matches('#').trim();
    let label = label.trim_matches(|c| c == '*' || c == '_').trim();
    let label = label.trim_end_matches(':').trim();
    let label = label.trim_matches(|c| c == '*' || c == '_').trim();
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_section_heading(line: &str) -> bool {
    if line.trim().is_empty() || BULLET.is_match(line) {
        return false;
    }
    let label = heading_label(line);
    SECTION_LABELS.contains(&label.as_str())
}

fn ends_section(line: &str) -> bool {
    MARKDOWN_HEADING.is_match(line)
        || HORIZONTAL_RULE.is_match(line)
        || BOLD_LINE.is_match(line)
        || line.trim_end().ends_with(':')
}

fn bullet_text(line: &str) -> Option<String> {
    if HORIZONTAL_RULE.is_match(line) {
        return None;
    }
    let captures = BULLET.captures(line)?;
    let text = CHECKBOX.replace(captures.get(1)?.as_str(), "");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Whether the text carries an explicit optional marker.
#[must_use]
pub fn is_optional(description: &str) -> bool {
    let lower = description.to_lowercase();
    OPTIONAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Keyword-derived tags in a fixed order.
#[must_use]
pub fn derive_tags(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    TAG_RULES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

/// Heuristic extraction plus optional enrichment.
#[derive(Clone)]
pub struct ChecklistExtractor {
    enricher: Arc<dyn Enricher>,
}

impl std::fmt::Debug for ChecklistExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecklistExtractor")
            .field("enricher", &self.enricher.name())
            .finish()
    }
}

impl Default for ChecklistExtractor {
    fn default() -> Self {
        Self::new(Arc::new(NoopEnricher))
    }
}

impl ChecklistExtractor {
    /// Creates an extractor backed by `enricher`.
    #[must_use]
    pub fn new(enricher: Arc<dyn Enricher>) -> Self {
        Self { enricher }
    }

    /// Name of the configured enricher.
    #[must_use]
    pub fn enricher_name(&self) -> &'static str {
        self.enricher.name()
    }

    /// Extracts items, merging enrichment suggestions when enabled.
    ///
    /// Enrichment failures are logged and otherwise ignored.
    pub async fn extract(&self, issue_text: &str) -> Vec<ChecklistItem> {
        let items = extract_items(issue_text);
        if !self.enricher.is_enabled() {
            return items;
        }

        match self.enricher.suggest(issue_text).await {
            Ok(suggestions) => {
                let heuristic = items.len();
                let merged = merge_suggestions(items, suggestions);
                tracing::debug!(
                    enricher = self.enricher.name(),
                    heuristic,
                    added = merged.len() - heuristic,
                    "merged enrichment suggestions"
                );
                merged
            },
            Err(error) => {
                tracing::warn!(
                    enricher = self.enricher.name(),
                    error = %error,
                    "enrichment failed, using heuristic checklist"
                );
                items
            },
        }
    }
}

/// Outcome of regenerating a checklist for an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecklistRevision {
    /// First checklist for the issue (version 1).
    Created(Checklist),
    /// Items changed; a new version was minted.
    Revised(Checklist),
    /// Items are identical to the latest version, which is returned.
    Unchanged(Checklist),
}

impl ChecklistRevision {
    /// The resulting checklist.
    #[must_use]
    pub const fn checklist(&self) -> &Checklist {
        match self {
            Self::Created(checklist) | Self::Revised(checklist) | Self::Unchanged(checklist) => {
                checklist
            },
        }
    }

    /// Consumes the revision, returning the checklist.
    #[must_use]
    pub fn into_checklist(self) -> Checklist {
        match self {
            Self::Created(checklist) | Self::Revised(checklist) | Self::Unchanged(checklist) => {
                checklist
            },
        }
    }

    /// Whether a new version must be stored.
    #[must_use]
    pub const fn is_new_version(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// Decides the next checklist version for an issue.
///
/// Prior versions are never modified; identical items reuse the latest
/// version.
#[must_use]
pub fn revise(
    previous: Option<&Checklist>,
    repo: &str,
    issue_number: u64,
    items: Vec<ChecklistItem>,
    now: DateTime<Utc>,
) -> ChecklistRevision {
    match previous {
        None => ChecklistRevision::Created(Checklist {
            repo: repo.to_string(),
            issue_number,
            version: 1,
            items,
            created_at: now,
        }),
        Some(latest) if latest.items == items => ChecklistRevision::Unchanged(latest.clone()),
        Some(latest) => ChecklistRevision::Revised(Checklist {
            repo: repo.to_string(),
            issue_number,
            version: latest.version + 1,
            items,
            created_at: now,
        }),
    }
}
