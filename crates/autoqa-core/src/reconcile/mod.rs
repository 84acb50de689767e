//! Matching CI outcomes to the manifest and scoring checklist compliance.
//!
//! # Matching
//!
//! Each outcome is matched by the first rule that fires:
//!
//! ```text
//! 1. exact     outcome name == entry.derived_name             -> entry(s)
//! 2. explicit  T<n> / C<n> in explicit_ids or name segments   -> entry | item
//! 3. fuzzy     |entry tokens ∩ outcome tokens| / |entry tokens|
//!              >= threshold, best score, ties to manifest order -> entry
//! ```
//!
//! The same symbol added in two files yields two entries with one derived
//! name. An exact match then goes to the entries whose target file stem
//! appears in the outcome's classname (`tests.test_billing` selects
//! `src/billing.py`); when the classname names none of them, every
//! same-named entry is credited. The fuzzy bound is inclusive: a similarity
//! equal to the threshold matches.
//!
//! Outcomes no rule matches, and synthetic ingestion diagnostics, are listed
//! in [`ComplianceReport::unmapped_outcomes`].
//!
//! # Scoring
//!
//! An item reaches every outcome matched to one of its linked entries, plus
//! outcomes matched to it directly. A failed or errored outcome makes the
//! item failed; otherwise a passed outcome makes it passed; otherwise it is
//! pending. The score is passed required items over required items, or 1.0
//! when nothing is required.

mod render;


use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub use render::{check_summary, render_report_comment, report_marker};

use crate::ingest::is_ingest_diagnostic;
use crate::model::{
    CiRunResults, Checklist, ComplianceReport, ItemStatus, ItemVerdict, MatchKey, MatchRule,
    MatchTarget, OutcomeMatch, OutcomeStatus, PrId, TestManifest, TestManifestEntry, TestOutcome,
};
use crate::text::Tokenizer;

/// Default minimum containment for a fuzzy match.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.6;

static EXPLICIT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[TC][1-9]\d*$").expect("static explicit-id regex"));

static EXPLICIT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[tc][1-9]\d*$").expect("static explicit-id regex"));

/// Errors that prevent producing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// The CI run tested a different commit than the manifest describes.
    #[error("CI run for {run_head} cannot be reconciled against manifest for {manifest_head}")]
    HeadMismatch {
        /// Head commit of the manifest.
        manifest_head: String,
        /// Head commit of the CI run.
        run_head: String,
    },

    /// The CI run belongs to another pull request.
    #[error("CI run for pull request #{run_pr} cannot be reconciled against manifest for #{manifest_pr}")]
    PullRequestMismatch {
        /// Pull request of the manifest.
        manifest_pr: u64,
        /// Pull request of the CI run.
        run_pr: u64,
    },

    /// The fuzzy threshold is outside (0, 1].
    #[error("fuzzy threshold {value} is outside (0, 1]")]
    InvalidThreshold {
        /// Rejected value.
        value: f64,
    },
}

/// Pure reconciler with a tunable threshold and tokenizer.
#[derive(Debug, Clone)]
pub struct Reconciler {
    fuzzy_threshold: f64,
    tokenizer: Tokenizer,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            tokenizer: Tokenizer::default(),
        }
    }
}

impl Reconciler {
    /// Creates a reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidThreshold`] unless
    /// `0 < fuzzy_threshold <= 1`.
    pub fn new(fuzzy_threshold: f64, tokenizer: Tokenizer) -> Result<Self, ReconcileError> {
        if !(fuzzy_threshold > 0.0 && fuzzy_threshold <= 1.0) {
            return Err(ReconcileError::InvalidThreshold {
                value: fuzzy_threshold,
            });
        }
        Ok(Self {
            fuzzy_threshold,
            tokenizer,
        })
    }

    /// Configured fuzzy threshold; a similarity equal to it matches.
    #[must_use]
    pub const fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Produces a report for one CI run of the manifest's head commit.
    ///
    /// The report is unversioned (`version == 0`); the store assigns the
    /// version when it is appended. `created_at` is the run's ingestion time,
    /// so identical inputs yield identical reports.
    ///
    /// # Errors
    ///
    /// Returns an error when the run belongs to another pull request or head
    /// commit.
    pub fn reconcile(
        &self,
        manifest: &TestManifest,
        run: &CiRunResults,
        checklist: Option<&Checklist>,
    ) -> Result<ComplianceReport, ReconcileError> {
        if manifest.pr_number != run.pr_number {
            return Err(ReconcileError::PullRequestMismatch {
                manifest_pr: manifest.pr_number,
                run_pr: run.pr_number,
            });
        }
        if manifest.head_sha != run.head_commit {
            return Err(ReconcileError::HeadMismatch {
                manifest_head: manifest.head_sha.clone(),
                run_head: run.head_commit.clone(),
            });
        }

        let entry_tokens: Vec<BTreeSet<String>> = manifest
            .tests
            .iter()
            .map(|entry| self.tokenizer.tokens(&entry.derived_name))
            .collect();

        let mut matches = Vec::new();
        let mut unmapped_outcomes = Vec::new();
        for outcome in &run.outcomes {
            let found = self.match_outcome(outcome, manifest, &entry_tokens, checklist);
            if found.is_empty() {
                unmapped_outcomes.push(outcome.clone());
            } else {
                matches.extend(found);
            }
        }

        let items = checklist.map_or_else(Vec::new, |checklist| {
            verdicts(checklist, &manifest.tests, &matches)
        });
        let required_total = items.iter().filter(|verdict| verdict.required).count();
        let required_passed = items
            .iter()
            .filter(|verdict| verdict.required && verdict.status == ItemStatus::Passed)
            .count();
        let score = ratio(required_passed, required_total);

        tracing::debug!(
            repo = %run.repo,
            pr_number = run.pr_number,
            head_sha = %run.head_commit,
            matched = matches.len(),
            unmapped = unmapped_outcomes.len(),
            score,
            "reconciled CI results"
        );

        Ok(ComplianceReport {
            pr_id: PrId::new(run.repo.clone(), run.pr_number),
            head_commit: run.head_commit.clone(),
            checklist_version: checklist.map(|checklist| checklist.version),
            items,
            matches,
            unmapped_outcomes,
            score,
            required_passed,
            required_total,
            version: 0,
            created_at: run.ingested_at,
        })
    }

    fn match_outcome(
        &self,
        outcome: &TestOutcome,
        manifest: &TestManifest,
        entry_tokens: &[BTreeSet<String>],
        checklist: Option<&Checklist>,
    ) -> Vec<OutcomeMatch> {
        if is_ingest_diagnostic(outcome) {
            return Vec::new();
        }
        let matched = |rule, target, similarity| OutcomeMatch {
            key: outcome.key.clone(),
            status: outcome.status,
            rule,
            target,
            similarity,
        };

        let exact = exact_entries(outcome, manifest);
        if !exact.is_empty() {
            return exact
                .into_iter()
                .map(|entry| matched(MatchRule::Exact, entry_target(entry), None))
                .collect();
        }

        if let Some(target) = explicit_target(outcome, manifest, checklist) {
            return vec![matched(MatchRule::Explicit, target, None)];
        }

        let outcome_tokens = self.tokenizer.tokens(&outcome.key.name);
        let mut best: Option<(usize, f64)> = None;
        for (index, tokens) in entry_tokens.iter().enumerate() {
            if tokens.is_empty() {
                continue;
            }
            let shared = tokens.intersection(&outcome_tokens).count();
            let similarity = ratio(shared, tokens.len());
            if similarity >= self.fuzzy_threshold
                && best.is_none_or(|(_, best_similarity)| similarity > best_similarity)
            {
                best = Some((index, similarity));
            }
        }
        best.map(|(index, similarity)| {
            matched(
                MatchRule::Fuzzy,
                entry_target(&manifest.tests[index]),
                Some(similarity),
            )
        })
        .into_iter()
        .collect()
    }
}

/// Entries the exact rule credits for an outcome, in manifest order.
fn exact_entries<'a>(
    outcome: &TestOutcome,
    manifest: &'a TestManifest,
) -> Vec<&'a TestManifestEntry> {
    let named: Vec<&TestManifestEntry> = manifest
        .tests
        .iter()
        .filter(|entry| entry.derived_name == outcome.key.name)
        .collect();
    if named.len() < 2 {
        return named;
    }
    let classname = outcome.key.classname.to_lowercase();
    let located: Vec<&TestManifestEntry> = named
        .iter()
        .copied()
        .filter(|entry| {
            Path::new(&entry.target_file)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| mentions_word(&classname, &stem.to_lowercase()))
        })
        .collect();
    if located.is_empty() { named } else { located }
}

/// Whether `needle` occurs in `haystack` bounded by non-alphanumerics.
fn mentions_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn entry_target(entry: &TestManifestEntry) -> MatchTarget {
    MatchTarget::Entry {
        test_id: entry.test_id.clone(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Candidate explicit id tokens: property values first, then name and
/// classname segments.
fn explicit_tokens(outcome: &TestOutcome) -> Vec<String> {
    let from_properties = outcome
        .explicit_ids
        .iter()
        .filter(|id| EXPLICIT_VALUE.is_match(id))
        .map(|id| id.to_ascii_uppercase());
    let from_segments = [&outcome.key.name, &outcome.key.classname]
        .into_iter()
        .flat_map(|text| text.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|segment| EXPLICIT_SEGMENT.is_match(segment))
        .map(str::to_string);
    from_properties.chain(from_segments).collect()
}

fn explicit_target(
    outcome: &TestOutcome,
    manifest: &TestManifest,
    checklist: Option<&Checklist>,
) -> Option<MatchTarget> {
    explicit_tokens(outcome).into_iter().find_map(|token| {
        if token.starts_with('T') {
            manifest.entry(&token).map(entry_target)
        } else {
            checklist
                .and_then(|checklist| checklist.item(&token))
                .map(|item| MatchTarget::Item {
                    item_id: item.id.clone(),
                })
        }
    })
}

fn verdicts(
    checklist: &Checklist,
    entries: &[TestManifestEntry],
    matches: &[OutcomeMatch],
) -> Vec<ItemVerdict> {
    let linked: HashMap<&str, &[String]> = entries
        .iter()
        .map(|entry| (entry.test_id.as_str(), entry.checklist_ids.as_slice()))
        .collect();

    let mut reached: HashMap<&str, Vec<(&MatchKey, OutcomeStatus)>> = HashMap::new();
    for matched in matches {
        let items: &[String] = match &matched.target {
            MatchTarget::Entry { test_id } => linked.get(test_id.as_str()).copied().unwrap_or(&[]),
            MatchTarget::Item { item_id } => std::slice::from_ref(item_id),
        };
        for item_id in items {
            reached
                .entry(item_id.as_str())
                .or_default()
                .push((&matched.key, matched.status));
        }
    }

    checklist
        .items
        .iter()
        .map(|item| {
            let outcomes = reached.get(item.id.as_str()).map_or(&[][..], Vec::as_slice);
            let status = if outcomes.iter().any(|(_, status)| status.is_failure()) {
                ItemStatus::Failed
            } else if outcomes
                .iter()
                .any(|(_, status)| *status == OutcomeStatus::Passed)
            {
                ItemStatus::Passed
            } else {
                ItemStatus::Pending
            };
            let mut evidence: Vec<MatchKey> = Vec::new();
            for (key, _) in outcomes {
                if !evidence.contains(*key) {
                    evidence.push((*key).clone());
                }
            }
            ItemVerdict {
                item_id: item.id.clone(),
                description: item.description.clone(),
                required: item.required,
                status,
                evidence,
            }
        })
        .collect()
}
