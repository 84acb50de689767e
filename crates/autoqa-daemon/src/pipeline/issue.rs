//! Issue events: extract, version and publish the checklist.

use autoqa_core::checklist::{checklist_marker, render_checklist_comment, revise};
use autoqa_core::events::IssueEvent;
use autoqa_core::retry::{EffectOutcome, retry};
use autoqa_core::store::StoreError;

use super::{Pipeline, PipelineError, post_once};

/// Result of an issue job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    /// Checklist version now current for the issue.
    pub version: u32,
    /// Whether this job stored a new version.
    pub new_version: bool,
    /// Number of items in the checklist.
    pub items: usize,
    /// Whether this job posted the checklist comment.
    pub commented: bool,
}

impl Pipeline {
    pub(super) async fn handle_issue(
        &self,
        event: &IssueEvent,
    ) -> Result<IssueOutcome, PipelineError> {
        let issue = retry(&self.retry, "fetch_issue", |_| {
            self.forge.fetch_issue(&event.repo, event.number)
        })
        .await
        .map_err(|error| PipelineError::forge("fetch_issue", error))?;

        let text = format!("{}\n\n{}", issue.title, issue.body);
        let items = self.extractor.extract(&text).await;

        let previous = self
            .store
            .latest_checklist(&event.repo.full_name, event.number)?;
        let revision = revise(
            previous.as_ref(),
            &event.repo.full_name,
            event.number,
            items,
            self.clock.now(),
        );
        let new_version = revision.is_new_version();
        let checklist = revision.into_checklist();

        if new_version {
            match self.store.save_checklist(&checklist) {
                Ok(()) => {},
                Err(StoreError::VersionConflict { key, .. }) => {
                    return Err(PipelineError::ConcurrencyConflict(format!(
                        "checklist {key} was revised concurrently"
                    )));
                },
                Err(error) => return Err(error.into()),
            }
            tracing::info!(
                repo = %event.repo,
                issue = event.number,
                version = checklist.version,
                items = checklist.items.len(),
                "checklist stored"
            );
        }

        // Also runs for unchanged checklists so a lost comment gets posted.
        let marker = checklist_marker(&checklist);
        let outcome = post_once(
            self.forge.as_ref(),
            &self.retry,
            &event.repo,
            event.number,
            &marker,
            &render_checklist_comment(&checklist),
        )
        .await?;

        Ok(IssueOutcome {
            version: checklist.version,
            new_version,
            items: checklist.items.len(),
            commented: matches!(outcome, EffectOutcome::Performed(_)),
        })
    }
}
