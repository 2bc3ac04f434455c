//! Keep exactly one bot comment on the pull request for a commit.

use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::checkout::{Checkout, RepositoryIdentity};
use crate::github::{GitHubError, PullRequest, PullRequestApi};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Could not find matching pull request for sha {0}")]
    NoMatchingPullRequest(String),

    #[error("Failed to read comment file {path}: {source}")]
    CommentFile {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

/// What a run did to the pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated { pr_number: u64, comment_id: u64 },
    Created { pr_number: u64, comment_id: u64 },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Updated {
                pr_number,
                comment_id,
            } => write!(f, "updated comment {comment_id} on pull request #{pr_number}"),
            Outcome::Created {
                pr_number,
                comment_id,
            } => write!(f, "created comment {comment_id} on pull request #{pr_number}"),
        }
    }
}

/// Read the replacement comment body.
pub fn read_comment_body(path: &Path) -> Result<String, ReconcileError> {
    std::fs::read_to_string(path).map_err(|source| ReconcileError::CommentFile {
        path: path.display().to_string(),
        source,
    })
}

/// First open pull request whose head is `sha`.
#[instrument(skip(api, repo), fields(owner = %repo.owner, repo = %repo.repo))]
pub async fn find_pull_request(
    api: &dyn PullRequestApi,
    repo: &RepositoryIdentity,
    sha: &str,
) -> Result<PullRequest, ReconcileError> {
    let pulls = api.list_open_pull_requests(repo).await?;
    debug!(open = pulls.len(), "listed open pull requests");
    pulls
        .into_iter()
        .find(|pull| pull.head.sha == sha)
        .ok_or_else(|| ReconcileError::NoMatchingPullRequest(sha.to_string()))
}

/// Update the first comment containing `body_match`, or create one.
///
/// Comments are scanned in listing order and the update is awaited before
/// returning, so at most one write happens and a match is never followed by
/// a create.
#[instrument(skip(api, repo, body_match, body), fields(owner = %repo.owner, repo = %repo.repo))]
pub async fn upsert_comment(
    api: &dyn PullRequestApi,
    repo: &RepositoryIdentity,
    pr_number: u64,
    body_match: &str,
    body: &str,
) -> Result<Outcome, ReconcileError> {
    let comments = api.list_issue_comments(repo, pr_number).await?;
    debug!(comments = comments.len(), "listed comments");

    for comment in &comments {
        if comment.body_contains(body_match) {
            debug!(comment_id = comment.id, "found matching comment");
            api.update_comment(repo, comment.id, body).await?;
            return Ok(Outcome::Updated {
                pr_number,
                comment_id: comment.id,
            });
        }
    }

    let created = api.create_comment(repo, pr_number, body).await?;
    Ok(Outcome::Created {
        pr_number,
        comment_id: created.id,
    })
}

/// Find the pull request for the checkout's HEAD and reconcile its comment.
#[instrument(skip_all, fields(sha = %checkout.head_sha))]
pub async fn reconcile(
    api: &dyn PullRequestApi,
    checkout: &Checkout,
    body_match: &str,
    body: &str,
) -> Result<Outcome, ReconcileError> {
    let pull = find_pull_request(api, &checkout.identity, &checkout.head_sha).await?;
    info!(pr_number = pull.number, "found pull request");

    let outcome = upsert_comment(api, &checkout.identity, pull.number, body_match, body).await?;
    info!(%outcome, "comment reconciled");
    Ok(outcome)
}
