//! Marker-guarded external effects.
//!
//! Every comment AutoQA posts starts with a hidden HTML marker. Before
//! posting, and before every repeat attempt, the existing comments are
//! searched for that marker; a post whose response was lost is therefore
//! never duplicated.

use autoqa_core::forge::{Comment, ForgeError, ForgeProvider};
use autoqa_core::model::RepoRef;
use autoqa_core::retry::{EffectOutcome, RetryPolicy, retry, retry_effect};

use super::PipelineError;

/// Whether any comment on `number` carries `marker`.
async fn has_marker(
    forge: &dyn ForgeProvider,
    repo: &RepoRef,
    number: u64,
    marker: &str,
) -> Result<bool, ForgeError> {
    let comments = forge.list_comments(repo, number).await?;
    Ok(comments.iter().any(|comment| comment.body.contains(marker)))
}

/// Posts `body` on `number` unless a comment carrying `marker` exists.
///
/// `body` must contain `marker`.
pub async fn post_once(
    forge: &dyn ForgeProvider,
    retry_policy: &RetryPolicy,
    repo: &RepoRef,
    number: u64,
    marker: &str,
    body: &str,
) -> Result<EffectOutcome<Comment>, PipelineError> {
    debug_assert!(body.contains(marker), "comment body must carry its marker");

    let present = retry(retry_policy, "list_comments", |_| {
        has_marker(forge, repo, number, marker)
    })
    .await
    .map_err(|error| PipelineError::forge("list_comments", error))?;
    if present {
        tracing::debug!(repo = %repo, number, marker, "comment already posted");
        return Ok(EffectOutcome::AlreadyApplied);
    }

    let outcome = retry_effect(
        retry_policy,
        "post_comment",
        |_| forge.post_comment(repo, number, body),
        || has_marker(forge, repo, number, marker),
    )
    .await
    .map_err(|error| PipelineError::forge("post_comment", error))?;

    if let EffectOutcome::Performed(comment) = &outcome {
        tracing::info!(repo = %repo, number, comment_id = comment.id, "posted comment");
    }
    Ok(outcome)
}
