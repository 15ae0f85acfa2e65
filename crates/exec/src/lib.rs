//! Publishing a sync pass: a branch with the catalog changes, pushed to
//! origin, with a pull request against the base branch.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use keeper_config::GithubConfig;
use tracing::info;

pub mod git;
pub mod github;

pub use git::CatalogRepo;
pub use github::{GithubClient, NewPullRequest, PullRequest};

/// `keeper/sync-20250301-120000`.
pub fn branch_name(now: DateTime<Utc>) -> String {
    format!("keeper/sync-{}", now.format("%Y%m%d-%H%M%S"))
}

/// `chore(catalog): update anthropic, openai models`.
pub fn commit_message(providers: &[String]) -> String {
    format!("chore(catalog): update {} models", providers.join(", "))
}

/// What [`publish`] produced.
#[derive(Debug, Clone)]
pub struct Submission {
    pub branch: String,
    pub commit: String,
    pub pull_request: PullRequest,
}

/// Branches, commits everything under `repo_path`, pushes and opens a pull
/// request whose title is the commit message.
///
/// Returns `Ok(None)` when the worktree has nothing to commit.
pub async fn publish(
    repo_path: &Path,
    github: &GithubConfig,
    providers: &[String],
    body: String,
    draft: bool,
    now: DateTime<Utc>,
) -> Result<Option<Submission>> {
    if providers.is_empty() {
        bail!("nothing to publish: no provider wrote changes");
    }
    let client = GithubClient::new(github)?;
    let repo = CatalogRepo::open(repo_path)?;

    let branch = branch_name(now);
    let message = commit_message(providers);

    repo.create_branch(&branch)?;
    if !repo.add_all()? {
        info!(branch = %branch, "worktree clean after sync, skipping pull request");
        return Ok(None);
    }
    let commit = repo.commit(&message)?;
    repo.push(&branch, &github.token)
        .await
        .with_context(|| format!("pushing {branch}"))?;

    let pull_request = client
        .create_pull_request(&NewPullRequest {
            title: message,
            body,
            head: branch.clone(),
            draft,
        })
        .await?;

    Ok(Some(Submission {
        branch,
        commit,
        pull_request,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn branch_and_message() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(branch_name(now), "keeper/sync-20250301-120005");
        assert_eq!(
            commit_message(&["anthropic".to_string(), "openai".to_string()]),
            "chore(catalog): update anthropic, openai models"
        );
    }

    #[tokio::test]
    async fn publish_needs_providers_and_github_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let gh = GithubConfig::default();
        let err = publish(dir.path(), &gh, &[], String::new(), false, Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to publish"));

        let err = publish(dir.path(), &gh, &["openai".to_string()], String::new(), false, Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("owner and repo"));
    }
}
