//! In-memory forge for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{
    Artifact, CheckRunRequest, Comment, ForgeError, ForgeProvider, IssueSnapshot, MergeRequest,
    MergeResult, ProtectionSnapshot, PullRequestSnapshot,
};
use crate::model::{ChangedFile, RepoRef};

type Key = (String, u64);

#[derive(Debug, Default)]
struct State {
    issues: HashMap<Key, IssueSnapshot>,
    pull_requests: HashMap<Key, PullRequestSnapshot>,
    diffs: HashMap<Key, String>,
    files: HashMap<Key, Vec<ChangedFile>>,
    commits: HashMap<Key, Vec<String>>,
    comments: HashMap<Key, Vec<Comment>>,
    check_runs: Vec<(u64, String, CheckRunRequest)>,
    artifacts: HashMap<Key, Vec<Artifact>>,
    artifact_bytes: HashMap<Key, Vec<u8>>,
    protections: HashMap<Key, ProtectionSnapshot>,
    merge_requests: Vec<(Key, MergeRequest)>,
    failures: HashMap<&'static str, VecDeque<ForgeError>>,
    lost_responses: HashMap<&'static str, VecDeque<ForgeError>>,
    next_id: u64,
    calls: HashMap<&'static str, u64>,
}

impl State {
    fn call(&mut self, operation: &'static str) -> Result<(), ForgeError> {
        *self.calls.entry(operation).or_default() += 1;
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn lost_response(&mut self, operation: &'static str) -> Result<(), ForgeError> {
        match self
            .lost_responses
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn key(repo: &RepoRef, number: u64) -> Key {
    (repo.full_name.clone(), number)
}

fn not_found(kind: &str, repo: &RepoRef, number: u64) -> ForgeError {
    ForgeError::NotFound {
        resource: format!("{repo} {kind} {number}"),
    }
}

/// Scriptable in-memory [`ForgeProvider`].
///
/// Failures can be injected per operation name (the trait method name):
/// [`fail_next`](Self::fail_next) fails before the call has any effect,
/// [`lose_next_response`](Self::lose_next_response) applies the effect and
/// then reports the error, as when a response is lost in transit.
#[derive(Debug, Default)]
pub struct InMemoryForge {
    state: Mutex<State>,
}

impl InMemoryForge {
    /// Creates an empty forge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Adds or replaces an issue.
    pub fn put_issue(&self, repo: &str, issue: IssueSnapshot) {
        self.with_state(|state| {
            state.issues.insert((repo.to_string(), issue.number), issue);
        });
    }

    /// Adds or replaces a pull request with its diff and changed files.
    pub fn put_pull_request(
        &self,
        repo: &str,
        pull_request: PullRequestSnapshot,
        diff: impl Into<String>,
        files: Vec<ChangedFile>,
    ) {
        let key = (repo.to_string(), pull_request.number);
        self.with_state(|state| {
            state.diffs.insert(key.clone(), diff.into());
            state.files.insert(key.clone(), files);
            state.pull_requests.insert(key, pull_request);
        });
    }

    /// Sets the commit messages of a pull request.
    pub fn put_commit_messages(&self, repo: &str, number: u64, messages: Vec<String>) {
        self.with_state(|state| {
            state.commits.insert((repo.to_string(), number), messages);
        });
    }

    /// Sets the protection snapshot of a pull request.
    pub fn put_protection(&self, repo: &str, number: u64, snapshot: ProtectionSnapshot) {
        self.with_state(|state| {
            state.protections.insert((repo.to_string(), number), snapshot);
        });
    }

    /// Adds an artifact with its archive bytes to a CI run.
    pub fn put_artifact(&self, repo: &str, run_id: u64, artifact: Artifact, bytes: Vec<u8>) {
        self.with_state(|state| {
            state
                .artifact_bytes
                .insert((repo.to_string(), artifact.id), bytes);
            state
                .artifacts
                .entry((repo.to_string(), run_id))
                .or_default()
                .push(artifact);
        });
    }

    /// Fails the next call of `operation` before it has any effect.
    pub fn fail_next(&self, operation: &'static str, error: ForgeError) {
        self.with_state(|state| state.failures.entry(operation).or_default().push_back(error));
    }

    /// Applies the next call of `operation`, then reports `error`.
    pub fn lose_next_response(&self, operation: &'static str, error: ForgeError) {
        self.with_state(|state| {
            state
                .lost_responses
                .entry(operation)
                .or_default()
                .push_back(error);
        });
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn calls(&self, operation: &str) -> u64 {
        self.with_state(|state| state.calls.get(operation).copied().unwrap_or_default())
    }

    /// Comments posted on an issue or pull request.
    #[must_use]
    pub fn comments(&self, repo: &str, number: u64) -> Vec<Comment> {
        self.with_state(|state| {
            state
                .comments
                .get(&(repo.to_string(), number))
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Check runs created, with their latest state.
    #[must_use]
    pub fn check_runs(&self, repo: &str) -> Vec<(u64, CheckRunRequest)> {
        self.with_state(|state| {
            state
                .check_runs
                .iter()
                .filter(|(_, owner, _)| owner == repo)
                .map(|(id, _, request)| (*id, request.clone()))
                .collect()
        })
    }

    /// Merge requests that took effect.
    #[must_use]
    pub fn merges(&self, repo: &str) -> Vec<(u64, MergeRequest)> {
        self.with_state(|state| {
            state
                .merge_requests
                .iter()
                .filter(|((owner, _), _)| owner == repo)
                .map(|((_, number), request)| (*number, request.clone()))
                .collect()
        })
    }
}

#[async_trait]
impl ForgeProvider for InMemoryForge {
    fn provider_name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> Result<IssueSnapshot, ForgeError> {
        self.with_state(|state| {
            state.call("fetch_issue")?;
            state
                .issues
                .get(&key(repo, number))
                .cloned()
                .ok_or_else(|| not_found("issue", repo, number))
        })
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestSnapshot, ForgeError> {
        self.with_state(|state| {
            state.call("fetch_pull_request")?;
            state
                .pull_requests
                .get(&key(repo, number))
                .cloned()
                .ok_or_else(|| not_found("pull request", repo, number))
        })
    }

    async fn fetch_pr_diff(&self, repo: &RepoRef, number: u64) -> Result<String, ForgeError> {
        self.with_state(|state| {
            state.call("fetch_pr_diff")?;
            state
                .diffs
                .get(&key(repo, number))
                .cloned()
                .ok_or_else(|| not_found("pull request", repo, number))
        })
    }

    async fn list_pr_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ChangedFile>, ForgeError> {
        self.with_state(|state| {
            state.call("list_pr_files")?;
            state
                .files
                .get(&key(repo, number))
                .cloned()
                .ok_or_else(|| not_found("pull request", repo, number))
        })
    }

    async fn list_pr_commit_messages(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<String>, ForgeError> {
        self.with_state(|state| {
            state.call("list_pr_commit_messages")?;
            Ok(state
                .commits
                .get(&key(repo, number))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<Comment>, ForgeError> {
        self.with_state(|state| {
            state.call("list_comments")?;
            Ok(state
                .comments
                .get(&key(repo, number))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn post_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<Comment, ForgeError> {
        self.with_state(|state| {
            state.call("post_comment")?;
            let comment = Comment {
                id: state.next_id(),
                body: body.to_string(),
            };
            state
                .comments
                .entry(key(repo, number))
                .or_default()
                .push(comment.clone());
            state.lost_response("post_comment")?;
            Ok(comment)
        })
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<u64, ForgeError> {
        self.with_state(|state| {
            state.call("create_check_run")?;
            let id = state.next_id();
            state
                .check_runs
                .push((id, repo.full_name.clone(), request.clone()));
            Ok(id)
        })
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<(), ForgeError> {
        self.with_state(|state| {
            state.call("update_check_run")?;
            let run = state
                .check_runs
                .iter_mut()
                .find(|(id, owner, _)| *id == check_run_id && *owner == repo.full_name)
                .ok_or_else(|| not_found("check run", repo, check_run_id))?;
            run.2 = request.clone();
            Ok(())
        })
    }

    async fn list_run_artifacts(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<Artifact>, ForgeError> {
        self.with_state(|state| {
            state.call("list_run_artifacts")?;
            Ok(state
                .artifacts
                .get(&key(repo, run_id))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn download_artifact(
        &self,
        repo: &RepoRef,
        artifact_id: u64,
    ) -> Result<Vec<u8>, ForgeError> {
        self.with_state(|state| {
            state.call("download_artifact")?;
            state
                .artifact_bytes
                .get(&key(repo, artifact_id))
                .cloned()
                .ok_or_else(|| not_found("artifact", repo, artifact_id))
        })
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, ForgeError> {
        self.with_state(|state| {
            state.call("merge_pull_request")?;
            let pr_key = key(repo, number);
            let pull_request = state
                .pull_requests
                .get_mut(&pr_key)
                .ok_or_else(|| not_found("pull request", repo, number))?;
            if pull_request.merged {
                return Err(ForgeError::Api {
                    status: 405,
                    message: "Pull Request is not mergeable".to_string(),
                });
            }
            if pull_request.head_sha != request.expected_head_sha {
                return Err(ForgeError::Conflict(
                    "Head branch was modified. Review and try the merge again.".to_string(),
                ));
            }
            pull_request.merged = true;
            let sha = format!("merge-{}", pull_request.head_sha);
            state.merge_requests.push((pr_key, request.clone()));
            state.lost_response("merge_pull_request")?;
            Ok(MergeResult {
                sha: Some(sha),
                message: "Pull Request successfully merged".to_string(),
            })
        })
    }

    async fn is_merged(&self, repo: &RepoRef, number: u64) -> Result<bool, ForgeError> {
        self.with_state(|state| {
            state.call("is_merged")?;
            state
                .pull_requests
                .get(&key(repo, number))
                .map(|pull_request| pull_request.merged)
                .ok_or_else(|| not_found("pull request", repo, number))
        })
    }

    async fn fetch_protection(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<ProtectionSnapshot, ForgeError> {
        self.with_state(|state| {
            state.call("fetch_protection")?;
            Ok(state
                .protections
                .get(&key(repo, number))
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::MergeMethod;

    fn repo() -> RepoRef {
        RepoRef::new("octo/app")
    }

    fn pull_request(head: &str) -> PullRequestSnapshot {
        PullRequestSnapshot {
            number: 4,
            head_sha: head.to_string(),
            ..PullRequestSnapshot::default()
        }
    }

    fn merge_request(head: &str) -> MergeRequest {
        MergeRequest {
            method: MergeMethod::Squash,
            expected_head_sha: head.to_string(),
            commit_title: "title".to_string(),
            commit_message: "message".to_string(),
        }
    }

    #[tokio::test]
    async fn test_merge_guards_head() {
        let forge = InMemoryForge::new();
        forge.put_pull_request("octo/app", pull_request("new"), "", Vec::new());

        let err = forge
            .merge_pull_request(&repo(), 4, &merge_request("old"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Conflict(_)));
        assert!(!forge.is_merged(&repo(), 4).await.unwrap());

        forge
            .merge_pull_request(&repo(), 4, &merge_request("new"))
            .await
            .unwrap();
        assert!(forge.is_merged(&repo(), 4).await.unwrap());
        assert_eq!(forge.merges("octo/app").len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let forge = InMemoryForge::new();
        forge.fail_next(
            "post_comment",
            ForgeError::RateLimited { retry_after: None },
        );
        forge.lose_next_response("post_comment", ForgeError::Transport("reset".to_string()));

        assert!(forge.post_comment(&repo(), 1, "a").await.is_err());
        assert!(forge.comments("octo/app", 1).is_empty());

        assert!(forge.post_comment(&repo(), 1, "b").await.is_err());
        assert_eq!(forge.comments("octo/app", 1).len(), 1);

        forge.post_comment(&repo(), 1, "c").await.unwrap();
        assert_eq!(forge.comments("octo/app", 1).len(), 2);
        assert_eq!(forge.calls("post_comment"), 3);
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let forge = InMemoryForge::new();
        let err = forge.fetch_issue(&repo(), 9).await.unwrap_err();
        assert!(matches!(err, ForgeError::NotFound { .. }));
        assert!(forge.list_comments(&repo(), 9).await.unwrap().is_empty());
        assert!(!forge.fetch_protection(&repo(), 9).await.unwrap().is_satisfied());
    }
}
