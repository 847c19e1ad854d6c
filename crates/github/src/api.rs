use std::{fmt, future::Future, sync::LazyLock};

use anyhow::{Context, Result, bail};
use regex::Regex;
use runlens_core::models::{JobsPage, WorkflowJob, WorkflowRun};
use serde::Serialize;

/// Largest page size the Actions API accepts.
pub const PAGE_SIZE: u8 = 100;

#[derive(Serialize)]
pub(crate) struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Read access to workflow runs and jobs of a single repository.
pub trait ActionsApi: Send + Sync {
    fn get_run(&self, run_id: u64) -> impl Future<Output = Result<WorkflowRun>> + Send;

    /// Every job of the run, across all pages.
    fn list_jobs(&self, run_id: u64) -> impl Future<Output = Result<Vec<WorkflowJob>>> + Send;

    fn get_job(&self, job_id: u64) -> impl Future<Output = Result<WorkflowJob>> + Send;

    /// The most recent run of a workflow, addressed by file name or ID.
    fn latest_run(
        &self,
        workflow: &str,
    ) -> impl Future<Output = Result<Option<WorkflowRun>>> + Send;
}

/// Fetch pages starting at 1 until a page comes back short.
pub async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<WorkflowJob>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<JobsPage>>,
{
    let mut jobs = vec![];
    let mut page = 1;
    loop {
        let response =
            fetch(page).await.with_context(|| format!("Failed to fetch jobs page {page}"))?;
        let count = response.jobs.len();
        jobs.extend(response.jobs);
        if count < PAGE_SIZE as usize {
            break;
        }
        page += 1;
    }
    Ok(jobs)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Accepts `owner/repo` or a GitHub repository URL.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some((owner, repo)) = extract_github_url(value) {
            return Ok(Self { owner: owner.to_string(), repo: repo.to_string() });
        }
        match value.split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self { owner: owner.to_string(), repo: repo.to_string() })
            }
            _ => bail!("Invalid repository '{}', expected owner/repo", value),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

pub fn extract_github_url(url: &str) -> Option<(&str, &str)> {
    static REGEX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^https?://github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?(?:/|$)")
            .unwrap()
    });
    let caps = REGEX.captures(url)?;
    let owner = caps.name("owner").map(|m| m.as_str()).unwrap_or_default();
    let repo = caps.name("repo").map(|m| m.as_str()).unwrap_or_default();
    Some((owner, repo))
}
