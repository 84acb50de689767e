//! Optional checklist enrichment capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{MIN_ITEM_LEN, derive_tags};
use crate::model::ChecklistItem;

/// Errors returned by an enrichment provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrichmentError {
    /// The provider could not be reached.
    #[error("enrichment provider unavailable: {reason}")]
    Unavailable {
        /// Transport or status detail.
        reason: String,
    },

    /// The provider answered with something that is not a suggestion list.
    #[error("invalid enrichment response: {reason}")]
    InvalidResponse {
        /// Parse detail.
        reason: String,
    },

    /// The provider is misconfigured.
    #[error("enrichment configuration error: {0}")]
    Configuration(String),
}

/// A checklist item proposed by an enrichment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedItem {
    /// Proposed criterion text.
    pub description: String,
    /// Whether the item should count towards the score.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Proposed tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_required() -> bool {
    true
}

/// Text-enrichment capability consulted after heuristic extraction.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Whether the provider should be consulted at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Proposes checklist items for an issue.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails; callers fall back to the
    /// heuristic checklist.
    async fn suggest(&self, issue_text: &str) -> Result<Vec<SuggestedItem>, EnrichmentError>;
}

/// Enricher that is never consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn suggest(&self, _issue_text: &str) -> Result<Vec<SuggestedItem>, EnrichmentError> {
        Ok(Vec::new())
    }
}

/// Merges suggestions into heuristic items.
///
/// A suggestion whose description contains, or is contained in, an existing
/// item's description (case-insensitive) contributes only its tags to that
/// item. Every other suggestion is appended with the next id. Existing items
/// keep their ids, descriptions and order.
#[must_use]
pub fn merge_suggestions(
    mut items: Vec<ChecklistItem>,
    suggestions: Vec<SuggestedItem>,
) -> Vec<ChecklistItem> {
    for suggestion in suggestions {
        let description = suggestion.description.trim();
        if description.chars().count() < MIN_ITEM_LEN {
            continue;
        }
        let lower = description.to_lowercase();

        let existing = items.iter_mut().find(|item| {
            let current = item.description.to_lowercase();
            current.contains(&lower) || lower.contains(&current)
        });

        if let Some(item) = existing {
            for tag in suggestion.tags {
                if !item.tags.contains(&tag) {
                    item.tags.push(tag);
                }
            }
            continue;
        }

        let mut tags = suggestion.tags;
        for tag in derive_tags(description) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        items.push(ChecklistItem {
            id: ChecklistItem::id_for_index(items.len()),
            description: description.to_string(),
            required: suggestion.required,
            tags,
        });
    }
    items
}
