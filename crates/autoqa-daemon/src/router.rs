//! Event intake: deduplicate, classify, dispatch.
//!
//! # Architecture
//!
//! ```text
//! EventRecord ──► claim delivery_id ──► classify ──► WorkQueue lane ──► Pipeline::run
//!                     │ (store ledger)      │
//!                     └─ duplicate          └─ ignored / malformed (acknowledged, dropped)
//! ```
//!
//! [`EventRouter::route`] returns as soon as the work is queued. The claim
//! is atomic in the store, so of two concurrent deliveries with the same id
//! exactly one is accepted.

use std::sync::Arc;

use autoqa_core::events::{ClassifiedEvent, EventRecord, WorkKey, classify};
use autoqa_core::store::{Store, StoreError};
use serde::Serialize;

use crate::pipeline::{Job, Pipeline};
use crate::queue::{Generation, WorkQueue};

/// The router's answer to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum Ack {
    /// Work was queued under these keys.
    Accepted {
        /// Lanes the work was queued on.
        keys: Vec<WorkKey>,
    },
    /// The delivery id was already claimed.
    Duplicate,
    /// The event needs no work.
    Ignored {
        /// Why.
        reason: String,
    },
    /// The record or its payload could not be read.
    Malformed {
        /// Why.
        reason: String,
    },
}

/// Routes event records onto the work queue.
pub struct EventRouter {
    store: Arc<dyn Store>,
    queue: Arc<WorkQueue>,
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("queue", &self.queue)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: Arc<WorkQueue>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            store,
            queue,
            pipeline,
        }
    }

    /// Claims, classifies and queues one record.
    ///
    /// # Errors
    ///
    /// Returns an error only if the delivery ledger cannot be written; the
    /// caller should then redeliver.
    pub fn route(&self, record: &EventRecord) -> Result<Ack, StoreError> {
        let delivery_id = record.delivery_id.trim();
        if delivery_id.is_empty() {
            tracing::warn!(event_type = %record.event_type, "event without delivery id");
            return Ok(Ack::Malformed {
                reason: "missing delivery id".to_string(),
            });
        }

        if !self.store.claim_delivery(delivery_id)? {
            tracing::info!(delivery_id, "duplicate delivery ignored");
            return Ok(Ack::Duplicate);
        }

        let classified = classify(record);
        tracing::debug!(
            delivery_id,
            event_type = %record.event_type,
            class = classified.kind(),
            "event classified"
        );
        let ack = match classified {
            ClassifiedEvent::Issue(event) => {
                let key = WorkKey::issue(event.repo.full_name.clone(), event.number);
                self.dispatch(key.clone(), Generation::Current, Job::Issue(event));
                Ack::Accepted { keys: vec![key] }
            },
            ClassifiedEvent::PullRequest(event) => {
                let key = WorkKey::pull_request(event.repo.full_name.clone(), event.number);
                let head = event.head_sha.clone();
                self.dispatch(
                    key.clone(),
                    Generation::Supersede(&head),
                    Job::PullRequest(event),
                );
                Ack::Accepted { keys: vec![key] }
            },
            ClassifiedEvent::CiRun(event) => self.dispatch_ci_run(delivery_id, event)?,
            ClassifiedEvent::Ignored { reason } => {
                tracing::debug!(delivery_id, reason = %reason, "event ignored");
                Ack::Ignored { reason }
            },
            ClassifiedEvent::Malformed { reason } => {
                tracing::warn!(delivery_id, reason = %reason, "malformed event");
                Ack::Malformed { reason }
            },
        };

        if let Ack::Accepted { keys } = &ack {
            tracing::info!(
                delivery_id,
                repo = %record.repo,
                keys = ?keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "event accepted"
            );
        }
        Ok(ack)
    }

    /// Fans a CI run out to every pull request it tested. Runs that carry no
    /// pull request numbers (forks) are matched by head commit.
    fn dispatch_ci_run(
        &self,
        delivery_id: &str,
        event: autoqa_core::events::CiRunEvent,
    ) -> Result<Ack, StoreError> {
        let mut numbers = event.pull_requests.clone();
        if numbers.is_empty() {
            if let Some(record) = self
                .store
                .find_pr_by_head(&event.repo.full_name, &event.head_sha)?
            {
                numbers.push(record.pr_number);
            }
        }
        if numbers.is_empty() {
            tracing::info!(
                delivery_id,
                run_id = event.run_id,
                head_sha = %event.head_sha,
                "CI run matches no tracked pull request"
            );
            return Ok(Ack::Ignored {
                reason: format!("run {} matches no tracked pull request", event.run_id),
            });
        }

        numbers.sort_unstable();
        numbers.dedup();
        let mut keys = Vec::with_capacity(numbers.len());
        for pr_number in numbers {
            let key = WorkKey::pull_request(event.repo.full_name.clone(), pr_number);
            self.dispatch(
                key.clone(),
                Generation::Join(&event.head_sha),
                Job::CiRun {
                    event: event.clone(),
                    pr_number,
                },
            );
            keys.push(key);
        }
        Ok(Ack::Accepted { keys })
    }

    fn dispatch(&self, key: WorkKey, generation: Generation<'_>, job: Job) {
        let pipeline = Arc::clone(&self.pipeline);
        // Failures are handled by the pipeline's dispositions; the handle
        // is only useful to callers that wait.
        let _handle = self.queue.submit_in(key, generation, move |token| async move {
            pipeline.run(&job, &token).await
        });
    }
}

#[cfg(test)]
mod tests {
    use autoqa_core::clock::SystemClock;
    use autoqa_core::forge::InMemoryForge;
    use autoqa_core::store::InMemoryStore;
    use serde_json::json;

    use super::*;

    fn router() -> (EventRouter, Arc<InMemoryStore>, Arc<WorkQueue>) {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WorkQueue::new(2));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(InMemoryForge::new()),
            store.clone(),
            Arc::new(SystemClock),
        ));
        (
            EventRouter::new(store.clone(), queue.clone(), pipeline),
            store,
            queue,
        )
    }

    fn record(event_type: &str, delivery_id: &str, payload: serde_json::Value) -> EventRecord {
        EventRecord {
            event_type: event_type.to_string(),
            delivery_id: delivery_id.to_string(),
            repo: "octo/app".to_string(),
            payload,
        }
    }

    fn issue_payload() -> serde_json::Value {
        json!({
            "action": "opened",
            "issue": { "number": 4 },
            "repository": { "full_name": "octo/app" }
        })
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acknowledged_once() {
        let (router, _store, queue) = router();
        let event = record("issues", "d-1", issue_payload());

        let first = router.route(&event).unwrap();
        assert_eq!(
            first,
            Ack::Accepted {
                keys: vec![WorkKey::issue("octo/app", 4)]
            }
        );
        assert_eq!(router.route(&event).unwrap(), Ack::Duplicate);
        queue.drain().await;
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let (router, _store, _queue) = router();
        let ack = router
            .route(&record("star", "d-2", json!({ "action": "created" })))
            .unwrap();
        assert!(matches!(ack, Ack::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_missing_delivery_id_is_malformed() {
        let (router, _store, _queue) = router();
        let ack = router.route(&record("issues", "  ", issue_payload())).unwrap();
        assert!(matches!(ack, Ack::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_untracked_ci_run_is_ignored() {
        let (router, _store, _queue) = router();
        let ack = router
            .route(&record(
                "workflow_run",
                "d-3",
                json!({
                    "action": "completed",
                    "workflow_run": {
                        "id": 77,
                        "name": "ci",
                        "head_sha": "abc",
                        "conclusion": "success",
                        "pull_requests": []
                    },
                    "repository": { "full_name": "octo/app" }
                }),
            ))
            .unwrap();
        assert!(matches!(ack, Ack::Ignored { .. }));
    }

    #[test]
    fn test_ack_wire_format() {
        let ack = Ack::Accepted {
            keys: vec![WorkKey::pull_request("octo/app", 12)],
        };
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({
                "ack": "accepted",
                "keys": [{ "kind": "pull_request", "repo": "octo/app", "number": 12 }]
            })
        );
    }
}
