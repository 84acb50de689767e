//! Keyed work queue.
//!
//! Jobs for the same [`WorkKey`] run one at a time in submission order; jobs
//! for different keys run in parallel up to a global concurrency limit.
//!
//! # Architecture
//!
//! ```text
//! submit(key) ──► Lane(key) ── tail ──► job N-1 done? ──► permit ──► run job N
//!                   │
//!                   └─ generation (head sha) + CancellationSource per head
//! ```
//!
//! A pull request lane tracks its jobs by the head commit they were queued
//! for. Superseding work for a new head cancels every other head's jobs:
//! queued jobs complete as [`Completion::Superseded`] without running, and a
//! running job is dropped at its next await point.
//!
//! | submission | idle lane | lane on `head` | lane on another head |
//! |------------|-----------|----------------|----------------------|
//! | [`Generation::Current`] | joins | joins | joins the lane's head |
//! | [`Generation::Supersede`] | adopts `head` | joins | cancels, adopts `head` |
//! | [`Generation::Join`] | adopts `head` | joins | queues under `head`, cancels nothing |

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use autoqa_core::events::WorkKey;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

// ============================================================================
// Cancellation
// ============================================================================

struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// The control side of a cancellation signal.
///
/// Dropping the source does not cancel its tokens.
pub struct CancellationSource {
    inner: Arc<CancellationInner>,
}

/// A cloneable view of a [`CancellationSource`].
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationSource {
    /// Creates an uncancelled source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancels every token of this source and wakes their waiters.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Whether the source was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the source is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is
            // never missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// How a queued job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// The job ran to completion.
    Completed(T),
    /// Newer work for the same key cancelled the job.
    Superseded,
}

/// Awaitable result of a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    job_id: Uuid,
    receiver: oneshot::Receiver<Completion<T>>,
}

impl<T> JobHandle<T> {
    /// Id used in the job's log span.
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Waits for the job. Returns `None` if the job panicked.
    pub async fn wait(self) -> Option<Completion<T>> {
        self.receiver.await.ok()
    }
}

/// Which generation of its lane a submitted job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation<'a> {
    /// Whatever generation the lane is on; used for keys without heads.
    Current,
    /// A new head commit; cancels work queued for any other head.
    Supersede(&'a str),
    /// Work derived from a head commit (a CI run); never cancels anything
    /// and is cancelled by a later superseding head.
    Join(&'a str),
}

struct LaneState {
    /// Head of the newest superseding submission, or of the first joining
    /// one on an idle lane.
    generation: Option<String>,
    /// One source per head with queued or running work; `None` holds work
    /// submitted before the lane had a head.
    sources: HashMap<Option<String>, CancellationSource>,
    tail: Option<oneshot::Receiver<()>>,
    pending: usize,
}

impl LaneState {
    fn source_for(&mut self, generation: Option<String>) -> &CancellationSource {
        self.sources
            .entry(generation)
            .or_insert_with(CancellationSource::new)
    }
}

type Lanes = Arc<Mutex<HashMap<WorkKey, LaneState>>>;

/// Per-key serializing, globally bounded job queue.
pub struct WorkQueue {
    semaphore: Arc<Semaphore>,
    lanes: Lanes,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

struct Slot {
    token: CancellationToken,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl WorkQueue {
    /// Creates a queue running at most `max_concurrency` jobs at once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            lanes: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues `job` behind earlier work for `key`, in the key's current
    /// generation.
    pub fn submit<T, F, Fut>(&self, key: WorkKey, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.submit_in(key, Generation::Current, job)
    }

    /// Queues `job` for `key` at head commit `head`.
    ///
    /// If the lane's generation is another head, every queued or running
    /// job of that generation is cancelled first.
    pub fn submit_superseding<T, F, Fut>(&self, key: WorkKey, head: &str, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.submit_in(key, Generation::Supersede(head), job)
    }

    /// Queues `job` as part of head commit `head` without cancelling
    /// anything.
    ///
    /// The job shares `head`'s generation, so a later superseding head
    /// cancels it while a superseding submission for `head` itself does not.
    /// An idle lane adopts `head`.
    pub fn submit_joining<T, F, Fut>(&self, key: WorkKey, head: &str, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.submit_in(key, Generation::Join(head), job)
    }

    /// Queues `job` for `key` in the given generation.
    pub fn submit_in<T, F, Fut>(
        &self,
        key: WorkKey,
        generation: Generation<'_>,
        job: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let slot = self.reserve(&key, generation);
        self.spawn(key, slot, job)
    }

    /// Number of keys with queued or running work.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits until every submitted job, including jobs submitted while
    /// draining, has finished.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(error) = result {
                    tracing::error!(error = %error, "queued job panicked");
                }
            }
        }
    }

    fn reserve(&self, key: &WorkKey, generation: Generation<'_>) -> Slot {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let lane = lanes.entry(key.clone()).or_insert_with(|| LaneState {
            generation: None,
            sources: HashMap::new(),
            tail: None,
            pending: 0,
        });

        let token = match generation {
            Generation::Current => lane.source_for(lane.generation.clone()).token(),
            Generation::Supersede(head) => {
                if lane.generation.as_deref() != Some(head) {
                    let stale: Vec<Option<String>> = lane
                        .sources
                        .keys()
                        .filter(|generation| generation.as_deref() != Some(head))
                        .cloned()
                        .collect();
                    for generation in stale {
                        if let Some(source) = lane.sources.remove(&generation) {
                            tracing::info!(
                                key = %key,
                                superseded = generation.as_deref().unwrap_or("-"),
                                head,
                                "newer head supersedes queued work"
                            );
                            source.cancel();
                        }
                    }
                    lane.generation = Some(head.to_string());
                }
                lane.source_for(Some(head.to_string())).token()
            },
            Generation::Join(head) => {
                if lane.generation.is_none() {
                    lane.generation = Some(head.to_string());
                }
                lane.source_for(Some(head.to_string())).token()
            },
        };

        let (done, next) = oneshot::channel();
        let previous = lane.tail.replace(next);
        lane.pending += 1;
        Slot {
            token,
            previous,
            done,
        }
    }

    fn spawn<T, F, Fut>(&self, key: WorkKey, slot: Slot, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let job_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        let semaphore = Arc::clone(&self.semaphore);
        let lanes = Arc::clone(&self.lanes);
        let span = tracing::info_span!("job", %job_id, key = %key);

        let task = async move {
            let Slot {
                token,
                previous,
                done,
            } = slot;
            if let Some(previous) = previous {
                // A dropped sender also means the predecessor finished.
                let _ = previous.await;
            }

            let completion = if token.is_cancelled() {
                Completion::Superseded
            } else {
                match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(_permit) => {
                        tokio::select! {
                            biased;
                            () = token.cancelled() => Completion::Superseded,
                            output = job(token.clone()) => Completion::Completed(output),
                        }
                    },
                    Err(_) => Completion::Superseded,
                }
            };
            if matches!(completion, Completion::Superseded) {
                tracing::info!("job superseded");
            }

            release(&lanes, &key);
            drop(done);
            let _ = sender.send(completion);
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task.instrument(span));
        JobHandle { job_id, receiver }
    }
}

fn release(lanes: &Lanes, key: &WorkKey) {
    let mut lanes = lanes.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lane) = lanes.get_mut(key) {
        lane.pending = lane.pending.saturating_sub(1);
        if lane.pending == 0 {
            lanes.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    fn pr_key(number: u64) -> WorkKey {
        WorkKey::pull_request("octo/app", number)
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let source = CancellationSource::new();
        let token = source.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::task::yield_now().await;
        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(source.is_cancelled());
    }

    #[tokio::test]
    async fn test_same_key_runs_in_submission_order() {
        let queue = WorkQueue::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for index in 0..5u32 {
            let order = Arc::clone(&order);
            handles.push(queue.submit(pr_key(1), move |_| async move {
                tokio::time::sleep(Duration::from_millis(u64::from(5 - index))).await;
                order.lock().unwrap().push(index);
                index
            }));
        }
        for (index, handle) in handles.into_iter().enumerate() {
            assert_eq!(
                handle.wait().await,
                Some(Completion::Completed(u32::try_from(index).unwrap()))
            );
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        queue.drain().await;
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = WorkQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for number in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.submit(pr_key(number), move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        queue.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_new_head_supersedes_queued_and_running_work() {
        let queue = WorkQueue::new(4);
        let (started_tx, started_rx) = oneshot::channel();
        let running = queue.submit_superseding(pr_key(9), "head-1", move |_| async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_secs(30)).await;
            "old"
        });
        let queued = queue.submit_superseding(pr_key(9), "head-1", |_| async { "old-queued" });
        started_rx.await.unwrap();

        let newer = queue.submit_superseding(pr_key(9), "head-2", |_| async { "new" });

        assert_eq!(running.wait().await, Some(Completion::Superseded));
        assert_eq!(queued.wait().await, Some(Completion::Superseded));
        assert_eq!(newer.wait().await, Some(Completion::Completed("new")));
    }

    #[tokio::test]
    async fn test_new_head_cancels_ci_work_on_idle_lane() {
        let queue = WorkQueue::new(4);
        let (started_tx, started_rx) = oneshot::channel();
        let ci_run = queue.submit_joining(pr_key(5), "head-1", move |_| async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_secs(30)).await;
            "ci-head-1"
        });
        started_rx.await.unwrap();

        let newer = queue.submit_superseding(pr_key(5), "head-2", |_| async { "head-2" });

        let finished = tokio::time::timeout(Duration::from_secs(1), async {
            (ci_run.wait().await, newer.wait().await)
        })
        .await
        .unwrap();
        assert_eq!(finished.0, Some(Completion::Superseded));
        assert_eq!(finished.1, Some(Completion::Completed("head-2")));
    }

    #[tokio::test]
    async fn test_ci_work_for_old_head_never_cancels_newer_head() {
        let queue = WorkQueue::new(4);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let current = queue.submit_superseding(pr_key(6), "head-2", move |token| async move {
            let _ = release_rx.await;
            token.is_cancelled()
        });
        let stale = queue.submit_joining(pr_key(6), "head-1", |_| async { false });
        let joined = queue.submit_joining(pr_key(6), "head-2", |token| async move {
            token.is_cancelled()
        });
        release_tx.send(()).unwrap();

        assert_eq!(current.wait().await, Some(Completion::Completed(false)));
        assert_eq!(stale.wait().await, Some(Completion::Completed(false)));
        assert_eq!(joined.wait().await, Some(Completion::Completed(false)));
        queue.drain().await;
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_late_push_keeps_ci_work_for_its_own_head() {
        let queue = WorkQueue::new(4);
        let (started_tx, started_rx) = oneshot::channel();
        let old_ci = queue.submit_joining(pr_key(7), "head-1", move |_| async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_secs(30)).await;
            "ci-head-1"
        });
        started_rx.await.unwrap();
        let new_ci = queue.submit_joining(pr_key(7), "head-2", |_| async { "ci-head-2" });
        let push = queue.submit_superseding(pr_key(7), "head-2", |_| async { "head-2" });

        let finished = tokio::time::timeout(Duration::from_secs(1), async {
            (old_ci.wait().await, new_ci.wait().await, push.wait().await)
        })
        .await
        .unwrap();
        assert_eq!(finished.0, Some(Completion::Superseded));
        assert_eq!(finished.1, Some(Completion::Completed("ci-head-2")));
        assert_eq!(finished.2, Some(Completion::Completed("head-2")));
    }

    #[tokio::test]
    async fn test_same_head_does_not_supersede() {
        let queue = WorkQueue::new(1);
        let first = queue.submit_superseding(pr_key(3), "head-1", |_| async { 1 });
        let joined = queue.submit(pr_key(3), |token| async move { token.is_cancelled() });
        let second = queue.submit_superseding(pr_key(3), "head-1", |_| async { 2 });
        assert_eq!(first.wait().await, Some(Completion::Completed(1)));
        assert_eq!(joined.wait().await, Some(Completion::Completed(false)));
        assert_eq!(second.wait().await, Some(Completion::Completed(2)));
    }
}
