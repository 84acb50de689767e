//! Compliance report produced by reconciliation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PrId;
use super::outcome::{MatchKey, OutcomeStatus, TestOutcome};

/// Aggregated status of one checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// At least one reachable outcome passed and none failed.
    Passed,
    /// A reachable outcome failed or errored.
    Failed,
    /// No reachable outcome yet.
    Pending,
}

impl ItemStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule matched an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    /// Outcome name equals an entry's derived name.
    Exact,
    /// Outcome carries a manifest or checklist id.
    Explicit,
    /// Token containment above the threshold.
    Fuzzy,
}

impl MatchRule {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Explicit => "explicit",
            Self::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an outcome was matched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchTarget {
    /// A manifest entry; reaches the entry's linked items.
    Entry {
        /// Manifest test id.
        test_id: String,
    },
    /// A checklist item, directly.
    Item {
        /// Checklist item id.
        item_id: String,
    },
}

/// Audit row for one matched outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMatch {
    /// Outcome identity.
    pub key: MatchKey,
    /// Outcome status.
    pub status: OutcomeStatus,
    /// Rule that fired.
    pub rule: MatchRule,
    /// Match target.
    pub target: MatchTarget,
    /// Containment score, for fuzzy matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Verdict row for one checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVerdict {
    /// Checklist item id.
    pub item_id: String,
    /// Item description, copied for rendering.
    pub description: String,
    /// Whether the item counts towards the score.
    pub required: bool,
    /// Aggregated status.
    pub status: ItemStatus,
    /// Outcomes that reached the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<MatchKey>,
}

/// Immutable reconciliation result for one pull request head commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Pull request.
    pub pr_id: PrId,
    /// Head commit of the manifest and CI run.
    pub head_commit: String,
    /// Checklist version used, if the pull request is linked to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_version: Option<u32>,
    /// Per-item verdicts in checklist order.
    pub items: Vec<ItemVerdict>,
    /// How each matched outcome was matched.
    pub matches: Vec<OutcomeMatch>,
    /// Outcomes no rule matched.
    pub unmapped_outcomes: Vec<TestOutcome>,
    /// Required items passed over required items; 1.0 when none are required.
    pub score: f64,
    /// Numerator of `score`.
    pub required_passed: usize,
    /// Denominator of `score`.
    pub required_total: usize,
    /// Monotonic per pull request; assigned by the store, 0 until stored.
    pub version: u32,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}

impl ComplianceReport {
    /// Status of one item, if the checklist has it.
    #[must_use]
    pub fn status_of(&self, item_id: &str) -> Option<ItemStatus> {
        self.items
            .iter()
            .find(|verdict| verdict.item_id == item_id)
            .map(|verdict| verdict.status)
    }

    /// `item_id -> status` view of the verdict table.
    #[must_use]
    pub fn per_item_status(&self) -> BTreeMap<String, ItemStatus> {
        self.items
            .iter()
            .map(|verdict| (verdict.item_id.clone(), verdict.status))
            .collect()
    }

    /// Whether any required item failed.
    #[must_use]
    pub fn has_failed_required(&self) -> bool {
        self.items
            .iter()
            .any(|verdict| verdict.required && verdict.status == ItemStatus::Failed)
    }

    /// Every required item passed.
    #[must_use]
    pub fn is_fully_compliant(&self) -> bool {
        self.required_passed == self.required_total
    }
}
