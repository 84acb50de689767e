//! Merge gating: compliance report + policy -> recorded merge decision.
//!
//! # Contracts
//!
//! - Absence of explicit enablement is a no-op decline, never a merge.
//! - Platform protections are consulted, never overridden: an unsatisfied
//!   snapshot declines even a perfect report.
//! - Every evaluation yields a [`MergeDecision`] carrying the score, flag
//!   state and protection state, eligible or not.
//! - Every decline reason that applies is listed, not only the first.
//!
//! ```text
//! ComplianceReport ─┐
//! MergePolicy ──────┼─► evaluate() ─► MergeDecision ─► MergeExecutor (eligible only)
//! ProtectionSnapshot┘                      │
//!                                          └─► store (always)
//! ```

mod executor;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use executor::{MergeExecutor, MergeExecutorError};

use crate::forge::{MergeMethod, ProtectionSnapshot};
use crate::model::{ComplianceReport, PrId};

/// Prefix of the idempotency marker placed in merge commit messages.
pub const MERGE_MARKER_PREFIX: &str = "autoqa-merge";

/// Merge policy. Auto-merge is off unless explicitly enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergePolicy {
    /// Default for repositories without an explicit entry.
    #[serde(default)]
    pub auto_merge: bool,

    /// Per-repository overrides keyed by `owner/name`.
    #[serde(default)]
    pub repositories: BTreeMap<String, bool>,

    /// Merge method used when merging.
    #[serde(default)]
    pub method: MergeMethod,
}

impl MergePolicy {
    /// Whether auto-merge is enabled for `repo`.
    #[must_use]
    pub fn auto_merge_enabled(&self, repo: &str) -> bool {
        self.repositories
            .get(repo)
            .copied()
            .unwrap_or(self.auto_merge)
    }
}

/// Why the gate declined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeclineReason {
    /// Auto-merge is not enabled for the repository.
    AutoMergeDisabled,
    /// The compliance score is below 1.0.
    ScoreBelowThreshold {
        /// Report score.
        score: f64,
    },
    /// At least one required item failed.
    RequiredItemFailed {
        /// Failed required item ids, in checklist order.
        item_ids: Vec<String>,
    },
    /// Branch protection or review state does not allow the merge.
    ProtectionNotSatisfied {
        /// Provider mergeability verdict.
        mergeable: Option<bool>,
        /// Provider mergeability detail.
        mergeable_state: String,
    },
    /// The report describes a commit that is no longer the head.
    StaleReport {
        /// Commit the report was produced for.
        report_head: String,
        /// Current head of the pull request.
        current_head: String,
    },
    /// The pull request is already merged.
    AlreadyMerged,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoMergeDisabled => f.write_str("auto-merge is not enabled for this repository"),
            Self::ScoreBelowThreshold { score } => {
                write!(f, "compliance score {:.0}% is below 100%", score * 100.0)
            },
            Self::RequiredItemFailed { item_ids } => {
                write!(f, "required items failed: {}", item_ids.join(", "))
            },
            Self::ProtectionNotSatisfied {
                mergeable,
                mergeable_state,
            } => write!(
                f,
                "branch protection not satisfied (mergeable={}, state={})",
                mergeable.map_or("unknown", |m| if m { "true" } else { "false" }),
                if mergeable_state.is_empty() {
                    "unknown"
                } else {
                    mergeable_state.as_str()
                }
            ),
            Self::StaleReport {
                report_head,
                current_head,
            } => write!(
                f,
                "report is for {report_head} but the head is now {current_head}"
            ),
            Self::AlreadyMerged => f.write_str("pull request is already merged"),
        }
    }
}

/// What happened when an eligible decision was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MergeExecution {
    /// This decision merged the pull request.
    Merged {
        /// Merge commit, when the provider returned one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha: Option<String>,
    },
    /// An earlier attempt had already merged it.
    AlreadyApplied,
    /// The merge call failed.
    Failed {
        /// Error text.
        error: String,
        /// Taxonomy class of the failure.
        class: crate::error::ErrorClass,
    },
}

/// A recorded gate decision with its reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    /// Pull request.
    pub pr_id: PrId,
    /// Commit the decision applies to.
    pub head_commit: String,
    /// Version of the report evaluated.
    pub report_version: u32,
    /// Whether every condition held.
    pub eligible: bool,
    /// Report score.
    pub score: f64,
    /// Whether auto-merge was enabled for the repository.
    pub auto_merge_enabled: bool,
    /// Protection snapshot consulted.
    pub protection: ProtectionSnapshot,
    /// Every reason the gate declined; empty when eligible.
    #[serde(default)]
    pub reasons: Vec<DeclineReason>,
    /// Execution result, for eligible decisions that were executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<MergeExecution>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

impl MergeDecision {
    /// Human-readable reasoning, one line per fact.
    #[must_use]
    pub fn reasoning(&self) -> Vec<String> {
        let mut lines = vec![
            format!("score: {:.0}%", self.score * 100.0),
            format!("auto-merge enabled: {}", self.auto_merge_enabled),
            format!(
                "protection satisfied: {} ({})",
                self.protection.is_satisfied(),
                self.protection.mergeable_state
            ),
        ];
        lines.extend(self.reasons.iter().map(ToString::to_string));
        lines
    }

    /// The idempotency marker for executing this decision.
    #[must_use]
    pub fn marker(&self) -> String {
        merge_marker(&self.pr_id, &self.head_commit)
    }
}

/// Inputs the gate evaluates.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// Latest compliance report.
    pub report: &'a ComplianceReport,
    /// Current head commit of the pull request.
    pub current_head: &'a str,
    /// Whether the pull request is already merged.
    pub already_merged: bool,
    /// Protection and review state.
    pub protection: &'a ProtectionSnapshot,
}

/// Evaluates the gate.
#[must_use]
pub fn evaluate(policy: &MergePolicy, input: &GateInput<'_>, now: DateTime<Utc>) -> MergeDecision {
    let report = input.report;
    let auto_merge_enabled = policy.auto_merge_enabled(&report.pr_id.repo);
    let mut reasons = Vec::new();

    if input.already_merged {
        reasons.push(DeclineReason::AlreadyMerged);
    }
    if !auto_merge_enabled {
        reasons.push(DeclineReason::AutoMergeDisabled);
    }
    if report.head_commit != input.current_head {
        reasons.push(DeclineReason::StaleReport {
            report_head: report.head_commit.clone(),
            current_head: input.current_head.to_string(),
        });
    }
    if !report.is_fully_compliant() {
        reasons.push(DeclineReason::ScoreBelowThreshold {
            score: report.score,
        });
    }
    let failed: Vec<String> = report
        .items
        .iter()
        .filter(|item| item.required && item.status == crate::model::ItemStatus::Failed)
        .map(|item| item.item_id.clone())
        .collect();
    if !failed.is_empty() {
        reasons.push(DeclineReason::RequiredItemFailed { item_ids: failed });
    }
    if !input.protection.is_satisfied() || input.protection.head_sha != input.current_head {
        reasons.push(DeclineReason::ProtectionNotSatisfied {
            mergeable: input.protection.mergeable,
            mergeable_state: input.protection.mergeable_state.clone(),
        });
    }

    MergeDecision {
        pr_id: report.pr_id.clone(),
        head_commit: report.head_commit.clone(),
        report_version: report.version,
        eligible: reasons.is_empty(),
        score: report.score,
        auto_merge_enabled,
        protection: input.protection.clone(),
        reasons,
        execution: None,
        decided_at: now,
    }
}

/// Idempotency marker for merging `pr_id` at `head`.
///
/// Stable across processes so a retried merge, or a restarted daemon, can
/// tell whether the effect was already applied.
#[must_use]
pub fn merge_marker(pr_id: &PrId, head: &str) -> String {
    let digest = Sha256::digest(format!("{pr_id}@{head}").as_bytes());
    let hex: String = digest[..8].iter().map(|byte| format!("{byte:02x}")).collect();
    format!("{MERGE_MARKER_PREFIX}:{hex}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::{ItemStatus, ItemVerdict};

    fn verdict(id: &str, required: bool, status: ItemStatus) -> ItemVerdict {
        ItemVerdict {
            item_id: id.to_string(),
            description: format!("item {id}"),
            required,
            status,
            evidence: Vec::new(),
        }
    }

    fn report(items: Vec<ItemVerdict>) -> ComplianceReport {
        let required_total = items.iter().filter(|item| item.required).count();
        let required_passed = items
            .iter()
            .filter(|item| item.required && item.status == ItemStatus::Passed)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let score = if required_total == 0 {
            1.0
        } else {
            required_passed as f64 / required_total as f64
        };
        ComplianceReport {
            pr_id: PrId::new("octo/app", 12),
            head_commit: "abc123".to_string(),
            checklist_version: Some(1),
            items,
            matches: Vec::new(),
            unmapped_outcomes: Vec::new(),
            score,
            required_passed,
            required_total,
            version: 2,
            created_at: now(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    fn clean() -> ProtectionSnapshot {
        ProtectionSnapshot {
            mergeable: Some(true),
            mergeable_state: "clean".to_string(),
            head_sha: "abc123".to_string(),
        }
    }

    fn enabled() -> MergePolicy {
        MergePolicy {
            auto_merge: true,
            ..MergePolicy::default()
        }
    }

    fn input<'a>(report: &'a ComplianceReport, protection: &'a ProtectionSnapshot) -> GateInput<'a> {
        GateInput {
            report,
            current_head: "abc123",
            already_merged: false,
            protection,
        }
    }

    #[test]
    fn test_eligible_when_every_condition_holds() {
        let report = report(vec![verdict("C1", true, ItemStatus::Passed)]);
        let protection = clean();
        let decision = evaluate(&enabled(), &input(&report, &protection), now());
        assert!(decision.eligible);
        assert!(decision.reasons.is_empty());
        assert_eq!(decision.report_version, 2);
        assert!(decision.reasoning()[0].contains("100%"));
    }

    #[test]
    fn test_disabled_by_default() {
        let report = report(vec![verdict("C1", true, ItemStatus::Passed)]);
        let protection = clean();
        let decision = evaluate(&MergePolicy::default(), &input(&report, &protection), now());
        assert!(!decision.eligible);
        assert_eq!(decision.reasons, vec![DeclineReason::AutoMergeDisabled]);
    }

    #[test]
    fn test_repository_override() {
        let mut policy = enabled();
        policy.repositories.insert("octo/app".to_string(), false);
        assert!(!policy.auto_merge_enabled("octo/app"));
        assert!(policy.auto_merge_enabled("octo/other"));

        let policy = MergePolicy {
            repositories: BTreeMap::from([("octo/app".to_string(), true)]),
            ..MergePolicy::default()
        };
        assert!(policy.auto_merge_enabled("octo/app"));
    }

    #[test]
    fn test_failed_required_item_lists_every_reason() {
        let report = report(vec![
            verdict("C1", true, ItemStatus::Failed),
            verdict("C2", true, ItemStatus::Passed),
            verdict("C3", false, ItemStatus::Failed),
        ]);
        let protection = clean();
        let decision = evaluate(&enabled(), &input(&report, &protection), now());
        assert!(!decision.eligible);
        assert_eq!(
            decision.reasons,
            vec![
                DeclineReason::ScoreBelowThreshold { score: 0.5 },
                DeclineReason::RequiredItemFailed {
                    item_ids: vec!["C1".to_string()]
                },
            ]
        );
    }

    #[test]
    fn test_protection_is_never_overridden() {
        let report = report(vec![verdict("C1", true, ItemStatus::Passed)]);
        let protection = ProtectionSnapshot {
            mergeable_state: "blocked".to_string(),
            ..clean()
        };
        let decision = evaluate(&enabled(), &input(&report, &protection), now());
        assert!(!decision.eligible);
        assert!(matches!(
            decision.reasons[0],
            DeclineReason::ProtectionNotSatisfied { .. }
        ));
        assert!(decision.reasons[0].to_string().contains("state=blocked"));
    }

    #[test]
    fn test_stale_report_and_merged_pr_decline() {
        let report = report(vec![verdict("C1", true, ItemStatus::Passed)]);
        let protection = ProtectionSnapshot {
            head_sha: "def456".to_string(),
            ..clean()
        };
        let gate_input = GateInput {
            current_head: "def456",
            already_merged: true,
            ..input(&report, &protection)
        };
        let decision = evaluate(&enabled(), &gate_input, now());
        assert_eq!(decision.reasons.len(), 2);
        assert_eq!(decision.reasons[0], DeclineReason::AlreadyMerged);
        assert!(matches!(decision.reasons[1], DeclineReason::StaleReport { .. }));
    }

    #[test]
    fn test_merge_marker_is_stable_per_head() {
        let pr = PrId::new("octo/app", 12);
        let marker = merge_marker(&pr, "abc123");
        assert_eq!(marker, merge_marker(&pr, "abc123"));
        assert_ne!(marker, merge_marker(&pr, "def456"));
        assert!(marker.starts_with("autoqa-merge:"));
        assert_eq!(marker.len(), "autoqa-merge:".len() + 16);
    }

    #[test]
    fn test_decision_serializes_reasons_with_tags() {
        let report = report(vec![verdict("C1", true, ItemStatus::Pending)]);
        let protection = clean();
        let decision = evaluate(&enabled(), &input(&report, &protection), now());
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["reasons"][0]["reason"], "score_below_threshold");
        assert_eq!(value["eligible"], false);
    }
}
