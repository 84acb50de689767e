//! [`ForgeProvider`] over the GitHub REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoqa_core::clock::Clock;
use autoqa_core::forge::{
    Artifact, CheckRunRequest, Comment, ForgeError, ForgeProvider, IssueSnapshot, MergeRequest,
    MergeResult, ProtectionSnapshot, PullRequestSnapshot,
};
use autoqa_core::github::{GITHUB_API_VERSION, InstallationTokenCache, TokenError};
use autoqa_core::log::redact_body;
use autoqa_core::model::{ChangedFile, RepoRef};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;

const PER_PAGE: usize = 100;

/// GitHub caps file listings at 3000 entries; artifacts never get close.
const MAX_PAGES: u32 = 30;

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_DIFF: &str = "application/vnd.github.v3.diff";
const USER_AGENT: &str = "autoqa-daemon";

/// GitHub REST forge.
pub struct GitHubRestForge {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<InstallationTokenCache>,
    clock: Arc<dyn Clock>,
    default_installation: Option<u64>,
}

impl std::fmt::Debug for GitHubRestForge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubRestForge")
            .field("api_url", &self.api_url)
            .field("default_installation", &self.default_installation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    sha: String,
    #[serde(rename = "ref", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullPayload {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: BranchRef,
    base: BranchRef,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    mergeable_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ArtifactsPage {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct MergePayload {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    message: String,
}

impl GitHubRestForge {
    /// Creates a forge.
    ///
    /// `default_installation` is used for repositories whose events carried
    /// no installation id (plain-token mode).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(
        api_url: &str,
        timeout: Duration,
        tokens: Arc<InstallationTokenCache>,
        clock: Arc<dyn Clock>,
        default_installation: Option<u64>,
    ) -> Result<Self, ForgeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| ForgeError::Configuration(error.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
            clock,
            default_installation,
        })
    }

    fn repo_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.api_url,
            repo.owner(),
            repo.name()
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Accept", ACCEPT_JSON)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    fn installation_for(&self, repo: &RepoRef) -> Result<u64, TokenError> {
        repo.installation_id
            .or(self.default_installation)
            .ok_or_else(|| TokenError::MissingInstallation {
                repo: repo.full_name.clone(),
            })
    }

    /// Authenticates and sends `request`, mapping error statuses.
    async fn send(&self, repo: &RepoRef, request: RequestBuilder) -> Result<Response, ForgeError> {
        let installation = self.installation_for(repo)?;
        let token = self.tokens.token(installation).await?;
        let response = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|error| ForgeError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(installation).await;
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status.as_u16(), &headers, &body, self.clock.now());
        tracing::debug!(
            repo = %repo,
            status = status.as_u16(),
            error = %error,
            "github request failed"
        );
        Err(error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        repo: &RepoRef,
        url: String,
    ) -> Result<T, ForgeError> {
        let response = self.send(repo, self.request(Method::GET, url)).await?;
        decode(response).await
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        repo: &RepoRef,
        url: &str,
    ) -> Result<Vec<T>, ForgeError> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let request = self
                .request(Method::GET, url.to_string())
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let batch: Vec<T> = decode(self.send(repo, request).await?).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }

    async fn fetch_pull_payload(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullPayload, ForgeError> {
        self.get_json(repo, self.repo_url(repo, &format!("pulls/{number}")))
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ForgeError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ForgeError::Transport(error.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn label_names(labels: Vec<Label>) -> Vec<String> {
    labels.into_iter().map(|label| label.name).collect()
}

/// Maps a failed GitHub response onto [`ForgeError`].
///
/// - 401: authentication
/// - 403 with an exhausted rate limit, and 429: rate limited, honoring
///   `Retry-After` or `x-ratelimit-reset`
/// - 404: not found
/// - 409: conflict (the head moved, or a concurrent update)
/// - anything else: an API error carrying the redacted body
#[must_use]
pub fn classify_status(status: u16, headers: &HeaderMap, body: &str, now: DateTime<Utc>) -> ForgeError {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };
    let rate_limited = status == 429
        || (status == 403
            && (header("x-ratelimit-remaining") == Some("0")
                || body.to_ascii_lowercase().contains("rate limit")));

    match status {
        401 => ForgeError::Authentication(redact_body(body)),
        _ if rate_limited => {
            let retry_after = header("retry-after")
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .or_else(|| {
                    let reset = header("x-ratelimit-reset")?.parse::<i64>().ok()?;
                    let wait = reset.saturating_sub(now.timestamp()).max(0);
                    Some(Duration::from_secs(u64::try_from(wait).unwrap_or(0)))
                });
            ForgeError::RateLimited { retry_after }
        },
        404 => ForgeError::NotFound {
            resource: redact_body(body),
        },
        409 => ForgeError::Conflict(redact_body(body)),
        _ => ForgeError::Api {
            status,
            message: redact_body(body),
        },
    }
}

#[async_trait]
impl ForgeProvider for GitHubRestForge {
    fn provider_name(&self) -> &'static str {
        "github"
    }

    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> Result<IssueSnapshot, ForgeError> {
        let payload: IssuePayload = self
            .get_json(repo, self.repo_url(repo, &format!("issues/{number}")))
            .await?;
        Ok(IssueSnapshot {
            number: payload.number,
            title: payload.title,
            body: payload.body.unwrap_or_default(),
            labels: label_names(payload.labels),
        })
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestSnapshot, ForgeError> {
        let payload = self.fetch_pull_payload(repo, number).await?;
        Ok(PullRequestSnapshot {
            number: payload.number,
            title: payload.title,
            body: payload.body.unwrap_or_default(),
            head_sha: payload.head.sha,
            head_ref: payload.head.name,
            base_ref: payload.base.name,
            labels: label_names(payload.labels),
            merged: payload.merged,
        })
    }

    async fn fetch_pr_diff(&self, repo: &RepoRef, number: u64) -> Result<String, ForgeError> {
        let request = self
            .request(Method::GET, self.repo_url(repo, &format!("pulls/{number}")))
            .header("Accept", ACCEPT_DIFF);
        self.send(repo, request)
            .await?
            .text()
            .await
            .map_err(|error| ForgeError::Transport(error.to_string()))
    }

    async fn list_pr_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ChangedFile>, ForgeError> {
        self.get_paginated(repo, &self.repo_url(repo, &format!("pulls/{number}/files")))
            .await
    }

    async fn list_pr_commit_messages(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<String>, ForgeError> {
        let commits: Vec<CommitPayload> = self
            .get_paginated(repo, &self.repo_url(repo, &format!("pulls/{number}/commits")))
            .await?;
        Ok(commits.into_iter().map(|commit| commit.commit.message).collect())
    }

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<Comment>, ForgeError> {
        let comments: Vec<CommentPayload> = self
            .get_paginated(repo, &self.repo_url(repo, &format!("issues/{number}/comments")))
            .await?;
        Ok(comments
            .into_iter()
            .map(|comment| Comment {
                id: comment.id,
                body: comment.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn post_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<Comment, ForgeError> {
        let request = self
            .request(
                Method::POST,
                self.repo_url(repo, &format!("issues/{number}/comments")),
            )
            .json(&serde_json::json!({ "body": body }));
        let payload: CommentPayload = decode(self.send(repo, request).await?).await?;
        Ok(Comment {
            id: payload.id,
            body: payload.body.unwrap_or_else(|| body.to_string()),
        })
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        request: &CheckRunRequest,
    ) -> Result<u64, ForgeError> {
        let builder = self
            .request(Method::POST, self.repo_url(repo, "check-runs"))
            .json(request);
        let payload: IdPayload = decode(self.send(repo, builder).await?).await?;
        Ok(payload.id)
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &CheckRunRequest,
    ) -> Result<(), ForgeError> {
        let builder = self
            .request(
                Method::PATCH,
                self.repo_url(repo, &format!("check-runs/{check_run_id}")),
            )
            .json(request);
        self.send(repo, builder).await?;
        Ok(())
    }

    async fn list_run_artifacts(
        &self,
        repo: &RepoRef,
        run_id: u64,
    ) -> Result<Vec<Artifact>, ForgeError> {
        let url = self.repo_url(repo, &format!("actions/runs/{run_id}/artifacts"));
        let mut artifacts = Vec::new();
        for page in 1..=MAX_PAGES {
            let request = self
                .request(Method::GET, url.clone())
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let batch: ArtifactsPage = decode(self.send(repo, request).await?).await?;
            let done = batch.artifacts.len() < PER_PAGE;
            artifacts.extend(batch.artifacts);
            if done {
                break;
            }
        }
        Ok(artifacts)
    }

    async fn download_artifact(
        &self,
        repo: &RepoRef,
        artifact_id: u64,
    ) -> Result<Vec<u8>, ForgeError> {
        let request = self.request(
            Method::GET,
            self.repo_url(repo, &format!("actions/artifacts/{artifact_id}/zip")),
        );
        let bytes = self
            .send(repo, request)
            .await?
            .bytes()
            .await
            .map_err(|error| ForgeError::Transport(error.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, ForgeError> {
        let builder = self
            .request(
                Method::PUT,
                self.repo_url(repo, &format!("pulls/{number}/merge")),
            )
            .json(&serde_json::json!({
                "merge_method": request.method.as_str(),
                "sha": request.expected_head_sha,
                "commit_title": request.commit_title,
                "commit_message": request.commit_message,
            }));
        let payload: MergePayload = decode(self.send(repo, builder).await?).await?;
        Ok(MergeResult {
            sha: payload.sha,
            message: payload.message,
        })
    }

    async fn is_merged(&self, repo: &RepoRef, number: u64) -> Result<bool, ForgeError> {
        let request = self.request(
            Method::GET,
            self.repo_url(repo, &format!("pulls/{number}/merge")),
        );
        match self.send(repo, request).await {
            Ok(_) => Ok(true),
            Err(ForgeError::NotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn fetch_protection(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<ProtectionSnapshot, ForgeError> {
        let payload = self.fetch_pull_payload(repo, number).await?;
        Ok(ProtectionSnapshot {
            mergeable: payload.mergeable,
            mergeable_state: payload.mergeable_state.unwrap_or_default(),
            head_sha: payload.head.sha,
        })
    }
}
