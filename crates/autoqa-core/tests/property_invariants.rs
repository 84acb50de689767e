//! Property tests for extraction determinism, score bounds and delivery
//! replay.

use autoqa_core::checklist::extract_items;
use autoqa_core::ingest::bind_results;
use autoqa_core::model::{
    Checklist, ChecklistItem, ItemStatus, OutcomeStatus, TestManifest, TestManifestEntry,
    TestOutcome,
};
use autoqa_core::reconcile::Reconciler;
use autoqa_core::store::{InMemoryStore, Store};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn issue_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("## Acceptance Criteria".to_string()),
        Just("Definition of done:".to_string()),
        Just("---".to_string()),
        Just(String::new()),
        "[a-z ]{0,24}".prop_map(|text| format!("- {text}")),
        "[a-z ]{0,24}".prop_map(|text| format!("1. must {text}")),
        "[a-z ]{0,24}".prop_map(|text| format!("* [x] {text} (optional)")),
        "[A-Za-z:# ]{0,30}",
    ]
}

fn status() -> impl Strategy<Value = OutcomeStatus> {
    prop_oneof![
        Just(OutcomeStatus::Passed),
        Just(OutcomeStatus::Failed),
        Just(OutcomeStatus::Skipped),
        Just(OutcomeStatus::Error),
    ]
}

fn entry_name(index: usize) -> String {
    format!("test_entry{index}_autoqa")
}

/// Items `C1..Cn`; entry `j` links to item `j % n`.
fn fixture(required: &[bool], entries: usize) -> (Checklist, TestManifest) {
    let items = required
        .iter()
        .enumerate()
        .map(|(index, &required)| ChecklistItem {
            id: ChecklistItem::id_for_index(index),
            description: format!("criterion number {index}"),
            required,
            tags: Vec::new(),
        })
        .collect::<Vec<_>>();
    let tests = (0..entries)
        .map(|index| TestManifestEntry {
            test_id: format!("T{}", index + 1),
            derived_name: entry_name(index),
            framework: "generic".to_string(),
            target_file: "src/lib.rs".to_string(),
            checklist_ids: vec![items[index % items.len()].id.clone()],
            symbol: None,
            kind: None,
        })
        .collect();
    let checklist = Checklist {
        repo: "octo/app".to_string(),
        issue_number: 1,
        version: 1,
        items,
        created_at: Utc.timestamp_opt(0, 0).single().unwrap(),
    };
    let manifest = TestManifest {
        pr_number: 2,
        head_sha: "head".to_string(),
        tests,
    };
    (checklist, manifest)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn extraction_is_deterministic(lines in prop::collection::vec(issue_line(), 0..24)) {
        let text = lines.join("\n");
        let first = extract_items(&text);
        let second = extract_items(&text);
        prop_assert_eq!(&first, &second);
        for (index, item) in first.iter().enumerate() {
            prop_assert_eq!(&item.id, &format!("C{}", index + 1));
            prop_assert!(item.description.chars().count() >= 3);
        }
    }

    #[test]
    fn score_is_bounded_and_exact(
        required in prop::collection::vec(any::<bool>(), 1..8),
        entries in 1usize..10,
        outcomes in prop::collection::vec((0usize..10, status()), 0..16),
    ) {
        let (checklist, manifest) = fixture(&required, entries);
        let outcomes: Vec<TestOutcome> = outcomes
            .iter()
            .map(|&(entry, status)| TestOutcome::new("suite", entry_name(entry % entries), status))
            .collect();
        let run = bind_results(
            "octo/app",
            2,
            "head",
            None,
            outcomes.clone(),
            Utc.timestamp_opt(10, 0).single().unwrap(),
        );

        let report = Reconciler::default()
            .reconcile(&manifest, &run, Some(&checklist))
            .unwrap();

        prop_assert!((0.0..=1.0).contains(&report.score));
        prop_assert!(report.unmapped_outcomes.is_empty());

        let all_required_passed = report
            .items
            .iter()
            .filter(|verdict| verdict.required)
            .all(|verdict| verdict.status == ItemStatus::Passed);
        prop_assert_eq!((report.score - 1.0).abs() < f64::EPSILON, all_required_passed);

        // Independent recomputation of every item's status.
        for (index, verdict) in report.items.iter().enumerate() {
            let reachable: Vec<OutcomeStatus> = outcomes
                .iter()
                .filter(|outcome| {
                    (0..entries).any(|entry| {
                        entry % required.len() == index && outcome.name() == entry_name(entry)
                    })
                })
                .map(|outcome| outcome.status)
                .collect();
            let expected = if reachable.iter().any(|status| status.is_failure()) {
                ItemStatus::Failed
            } else if reachable.contains(&OutcomeStatus::Passed) {
                ItemStatus::Passed
            } else {
                ItemStatus::Pending
            };
            prop_assert_eq!(verdict.status, expected);
        }
    }

    #[test]
    fn replayed_delivery_is_claimed_once(ids in prop::collection::vec("[a-f0-9]{4}", 1..32)) {
        let store = InMemoryStore::new();
        let mut claimed = std::collections::HashSet::new();
        for id in ids.iter().chain(ids.iter()) {
            prop_assert_eq!(store.claim_delivery(id).unwrap(), claimed.insert(id.clone()));
        }
    }
}

#[test]
fn test_vacuous_score_without_required_items() {
    let (checklist, manifest) = fixture(&[false, false], 2);
    let run = bind_results(
        "octo/app",
        2,
        "head",
        None,
        vec![TestOutcome::new("suite", entry_name(0), OutcomeStatus::Failed)],
        Utc.timestamp_opt(10, 0).single().unwrap(),
    );
    let report = Reconciler::default()
        .reconcile(&manifest, &run, Some(&checklist))
        .unwrap();
    assert!((report.score - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.status_of("C1"), Some(ItemStatus::Failed));
}
