//! Pull request creation through the GitHub REST API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use keeper_config::GithubConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

pub struct GithubClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    base: String,
}

impl GithubClient {
    pub fn new(cfg: &GithubConfig) -> Result<Self> {
        if cfg.owner.is_empty() || cfg.repo.is_empty() {
            bail!("[github] owner and repo must be set to open pull requests");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("catalog-keeper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: pulls_endpoint(&cfg.api_url, &cfg.owner, &cfg.repo),
            token: cfg.token.clone(),
            base: cfg.base_branch.clone(),
        })
    }

    pub async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequest> {
        let payload = json!({
            "title": pr.title,
            "head": pr.head,
            "base": self.base,
            "body": pr.body,
            "draft": pr.draft,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&payload)
            .send()
            .await
            .context("sending pull request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error ({status}): {}", body.trim());
        }
        let created: PullRequest = response.json().await.context("reading pull request response")?;
        info!(number = created.number, url = %created.html_url, draft = pr.draft, "pull request opened");
        Ok(created)
    }
}

fn pulls_endpoint(api_url: &str, owner: &str, repo: &str) -> String {
    format!("{}/repos/{owner}/{repo}/pulls", api_url.trim_end_matches('/'))
}
