//! In-memory [`Store`] for tests, the CLI and single-process deployments.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{Store, StoreError};
use crate::gate::MergeDecision;
use crate::model::{
    Checklist, CiRunResults, ComplianceReport, ManifestRecord, PrId, PullRequestRecord,
    ValidationStatus,
};

/// Number of delivery ids remembered for deduplication.
pub const DEFAULT_DELIVERY_LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct DeliveryLedger {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

#[derive(Debug, Default)]
struct State {
    deliveries: DeliveryLedger,
    checklists: BTreeMap<(String, u64), Vec<Checklist>>,
    pull_requests: BTreeMap<PrId, PullRequestRecord>,
    manifests: BTreeMap<PrId, Vec<ManifestRecord>>,
    ci_results: BTreeMap<(PrId, String), Vec<CiRunResults>>,
    reports: BTreeMap<PrId, Vec<ComplianceReport>>,
    decisions: BTreeMap<PrId, Vec<MergeDecision>>,
    effects: HashSet<String>,
}

/// Store backed by process memory.
///
/// The delivery ledger is bounded; the oldest ids are forgotten first.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    ledger_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with the default ledger capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ledger_capacity(DEFAULT_DELIVERY_LEDGER_CAPACITY)
    }

    /// Creates an empty store remembering at most `capacity` delivery ids.
    #[must_use]
    pub fn with_ledger_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ledger_capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn checklist_key(repo: &str, issue_number: u64) -> (String, u64) {
    (repo.to_string(), issue_number)
}

impl Store for InMemoryStore {
    fn claim_delivery(&self, delivery_id: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let ledger = &mut state.deliveries;
        if ledger.seen.contains(delivery_id) {
            return Ok(false);
        }
        ledger.seen.insert(delivery_id.to_string());
        ledger.order.push_back(delivery_id.to_string());
        while ledger.order.len() > self.ledger_capacity {
            if let Some(evicted) = ledger.order.pop_front() {
                ledger.seen.remove(&evicted);
            }
        }
        Ok(true)
    }

    fn save_checklist(&self, checklist: &Checklist) -> Result<(), StoreError> {
        let mut state = self.lock();
        let versions = state
            .checklists
            .entry(checklist_key(&checklist.repo, checklist.issue_number))
            .or_default();
        let expected = versions.last().map_or(1, |latest| latest.version + 1);
        if checklist.version != expected {
            return Err(StoreError::VersionConflict {
                key: format!("{}#{}", checklist.repo, checklist.issue_number),
                expected,
                actual: checklist.version,
            });
        }
        versions.push(checklist.clone());
        Ok(())
    }

    fn latest_checklist(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> Result<Option<Checklist>, StoreError> {
        Ok(self
            .lock()
            .checklists
            .get(&checklist_key(repo, issue_number))
            .and_then(|versions| versions.last().cloned()))
    }

    fn checklist_versions(
        &self,
        repo: &str,
        issue_number: u64,
    ) -> Result<Vec<Checklist>, StoreError> {
        Ok(self
            .lock()
            .checklists
            .get(&checklist_key(repo, issue_number))
            .cloned()
            .unwrap_or_default())
    }

    fn upsert_pull_request(
        &self,
        record: &PullRequestRecord,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let pr_id = record.pr_id();
        let mut state = self.lock();

        let manifests = state.manifests.entry(pr_id.clone()).or_default();
        for stored in manifests.iter_mut().filter(|stored| stored.is_active()) {
            if stored.manifest != record.manifest {
                stored.superseded_by = Some(record.head_commit.clone());
            }
        }
        match manifests
            .iter_mut()
            .rev()
            .find(|stored| stored.manifest.head_sha == record.head_commit)
        {
            Some(latest) if latest.manifest == record.manifest => latest.superseded_by = None,
            _ => manifests.push(ManifestRecord {
                manifest: record.manifest.clone(),
                superseded_by: None,
                recorded_at,
            }),
        }

        state.pull_requests.insert(pr_id, record.clone());
        Ok(())
    }

    fn pull_request(&self, pr_id: &PrId) -> Result<Option<PullRequestRecord>, StoreError> {
        Ok(self.lock().pull_requests.get(pr_id).cloned())
    }

    fn find_pr_by_head(
        &self,
        repo: &str,
        head_commit: &str,
    ) -> Result<Option<PullRequestRecord>, StoreError> {
        Ok(self
            .lock()
            .pull_requests
            .values()
            .find(|record| record.repo == repo && record.head_commit == head_commit)
            .cloned())
    }

    fn manifest_for(
        &self,
        pr_id: &PrId,
        head_commit: &str,
    ) -> Result<Option<ManifestRecord>, StoreError> {
        Ok(self.lock().manifests.get(pr_id).and_then(|records| {
            records
                .iter()
                .rev()
                .find(|stored| stored.manifest.head_sha == head_commit)
                .cloned()
        }))
    }

    fn manifests(&self, pr_id: &PrId) -> Result<Vec<ManifestRecord>, StoreError> {
        Ok(self
            .lock()
            .manifests
            .get(pr_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_validation_status(
        &self,
        pr_id: &PrId,
        head_commit: &str,
        status: ValidationStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let record = state
            .pull_requests
            .get_mut(pr_id)
            .ok_or_else(|| StoreError::UnknownPullRequest(pr_id.clone()))?;
        if record.head_commit != head_commit {
            return Ok(false);
        }
        // Merged is terminal.
        if record.validation_status == ValidationStatus::Merged && status != ValidationStatus::Merged
        {
            return Ok(false);
        }
        record.validation_status = status;
        Ok(true)
    }

    fn record_ci_results(&self, results: &CiRunResults) -> Result<(), StoreError> {
        let key = (
            PrId::new(results.repo.clone(), results.pr_number),
            results.head_commit.clone(),
        );
        self.lock()
            .ci_results
            .entry(key)
            .or_default()
            .push(results.clone());
        Ok(())
    }

    fn ci_results(
        &self,
        pr_id: &PrId,
        head_commit: &str,
    ) -> Result<Vec<CiRunResults>, StoreError> {
        Ok(self
            .lock()
            .ci_results
            .get(&(pr_id.clone(), head_commit.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn append_report(&self, mut report: ComplianceReport) -> Result<ComplianceReport, StoreError> {
        let mut state = self.lock();
        let reports = state.reports.entry(report.pr_id.clone()).or_default();
        report.version = reports.last().map_or(1, |latest| latest.version + 1);
        reports.push(report.clone());
        Ok(report)
    }

    fn latest_report(&self, pr_id: &PrId) -> Result<Option<ComplianceReport>, StoreError> {
        Ok(self
            .lock()
            .reports
            .get(pr_id)
            .and_then(|reports| reports.last().cloned()))
    }

    fn reports(&self, pr_id: &PrId) -> Result<Vec<ComplianceReport>, StoreError> {
        Ok(self.lock().reports.get(pr_id).cloned().unwrap_or_default())
    }

    fn record_merge_decision(&self, decision: &MergeDecision) -> Result<(), StoreError> {
        self.lock()
            .decisions
            .entry(decision.pr_id.clone())
            .or_default()
            .push(decision.clone());
        Ok(())
    }

    fn merge_decisions(&self, pr_id: &PrId) -> Result<Vec<MergeDecision>, StoreError> {
        Ok(self.lock().decisions.get(pr_id).cloned().unwrap_or_default())
    }

    fn mark_effect(&self, marker: &str) -> Result<bool, StoreError> {
        Ok(self.lock().effects.insert(marker.to_string()))
    }

    fn effect_applied(&self, marker: &str) -> Result<bool, StoreError> {
        Ok(self.lock().effects.contains(marker))
    }
}
