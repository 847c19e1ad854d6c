pub mod api;
pub mod archive;
pub mod metadata;
pub mod retriever;
pub mod retry;

use std::collections::HashMap;

use anyhow::{Context, Result};
use bytes::Bytes;
use octocrab::Octocrab;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderValue};
use runlens_core::{
    config::GitHubConfig,
    models::{WorkflowJob, WorkflowRun, WorkflowRunsPage},
};
use url::Url;

use crate::{
    api::{ActionsApi, PAGE_SIZE, PageParams, RepoSlug, collect_pages},
    metadata::{StepMetadata, parse_check_steps},
    retriever::{LogSource, StepMetadataSource},
    retry::{RetryPolicy, with_retry},
};

const USER_AGENT: &str = concat!("runlens/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Actions client bound to a single repository.
pub struct GitHub {
    pub client: Octocrab,
    pub repo: RepoSlug,
    http: reqwest::Client,
    authorization: Option<HeaderValue>,
    session_cookie: Option<HeaderValue>,
    api_base: Url,
    web_base: Url,
    retry: RetryPolicy,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig, repo: RepoSlug, retry: RetryPolicy) -> Result<Self> {
        let api_base = Url::parse(&config.api_base)
            .with_context(|| format!("Invalid GitHub API base {}", config.api_base))?;
        let web_base = Url::parse(&config.web_base)
            .with_context(|| format!("Invalid GitHub web base {}", config.web_base))?;
        let token = (!config.token.is_empty()).then(|| config.token.clone());

        let mut builder = Octocrab::builder()
            .base_uri(config.api_base.as_str())
            .context("Invalid GitHub API base")?;
        if let Some(token) = &token {
            builder = builder.personal_token(token.clone());
        }
        let client = builder.build().context("Failed to create GitHub client")?;
        if token.is_some() {
            match client.current().user().await {
                Ok(profile) => tracing::info!("Logged in as {}", profile.login),
                Err(e) => tracing::warn!("Failed to fetch current user: {}", e),
            }
        } else {
            tracing::warn!("No GitHub token configured, using anonymous access");
        }

        let authorization = token
            .as_deref()
            .map(|token| sensitive(&format!("Bearer {token}")))
            .transpose()
            .context("Invalid GitHub token")?;
        let session_cookie = config
            .session
            .cookie_header()
            .map(|cookie| sensitive(&cookie))
            .transpose()
            .context("Invalid GitHub session cookies")?;
        if session_cookie.is_none() {
            tracing::debug!("No GitHub session cookies configured, job pages may be unavailable");
        }

        let mut http = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(proxy_url) = &config.session.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .with_context(|| format!("Invalid proxy URL {proxy_url}"))?;
            tracing::info!("Using proxy {} for GitHub web requests", proxy_url);
            http = http.proxy(proxy);
        }
        let http = http.build().context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            repo,
            http,
            authorization,
            session_cookie,
            api_base,
            web_base,
            retry,
        })
    }

    fn route(&self, path: &str) -> String {
        format!("/repos/{}/{}{}", self.repo.owner, self.repo.repo, path)
    }

    /// The token goes to the API host and the session cookies to the web host. Nothing is
    /// sent anywhere else, such as the blob storage step logs redirect to.
    fn credentials(&self, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = &self.authorization
            && same_origin(url, &self.api_base)
        {
            headers.insert(AUTHORIZATION, value.clone());
        }
        if let Some(value) = &self.session_cookie
            && same_origin(url, &self.web_base)
        {
            headers.insert(COOKIE, value.clone());
        }
        headers
    }

    fn get(&self, url: &Url) -> reqwest::RequestBuilder {
        self.http.get(url.clone()).headers(self.credentials(url))
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let response = self.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

fn same_origin(url: &Url, base: &Url) -> bool { base.origin() == url.origin() }

fn sensitive(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn job_page_url(web_base: &Url, repo: &RepoSlug, run_id: u64, job_id: u64) -> Result<Url> {
    let mut url = web_base
        .join(&format!("/{}/{}/actions/runs/{}/job/{}", repo.owner, repo.repo, run_id, job_id))
        .context("Failed to build job page URL")?;
    url.query_pairs_mut().append_pair("check_suite_focus", "true");
    Ok(url)
}

pub fn job_logs_url(api_base: &Url, repo: &RepoSlug, job_id: u64) -> Result<Url> {
    let base = api_base.as_str().trim_end_matches('/');
    let url = format!("{}/repos/{}/{}/actions/jobs/{}/logs", base, repo.owner, repo.repo, job_id);
    Url::parse(&url).with_context(|| format!("Invalid job logs URL {url}"))
}

impl ActionsApi for GitHub {
    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun> {
        let route = &self.route(&format!("/actions/runs/{run_id}"));
        let client = &self.client;
        with_retry(self.retry, "Fetching workflow run", || async move {
            Ok(client.get(route, None::<&()>).await?)
        })
        .await
        .with_context(|| format!("Failed to fetch workflow run {run_id}"))
    }

    async fn list_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>> {
        let route = &self.route(&format!("/actions/runs/{run_id}/jobs"));
        let client = &self.client;
        let policy = self.retry;
        let jobs = collect_pages(|page| async move {
            let params = PageParams { per_page: Some(PAGE_SIZE), page: Some(page) };
            let params = &params;
            with_retry(policy, "Listing workflow jobs", || async move {
                Ok(client.get(route, Some(params)).await?)
            })
            .await
        })
        .await
        .with_context(|| format!("Failed to list jobs for run {run_id}"))?;
        tracing::debug!("Run {} has {} jobs", run_id, jobs.len());
        Ok(jobs)
    }

    async fn get_job(&self, job_id: u64) -> Result<WorkflowJob> {
        let route = &self.route(&format!("/actions/jobs/{job_id}"));
        let client = &self.client;
        with_retry(self.retry, "Fetching job", || async move {
            Ok(client.get(route, None::<&()>).await?)
        })
        .await
        .with_context(|| format!("Failed to fetch job {job_id}"))
    }

    async fn latest_run(&self, workflow: &str) -> Result<Option<WorkflowRun>> {
        let route = &self.route(&format!("/actions/workflows/{workflow}/runs"));
        let client = &self.client;
        let params = &PageParams { per_page: Some(1), page: None };
        let page: WorkflowRunsPage = with_retry(self.retry, "Listing workflow runs", || async move {
            Ok(client.get(route, Some(params)).await?)
        })
        .await
        .with_context(|| format!("Failed to list runs of workflow {workflow}"))?;
        Ok(page.workflow_runs.into_iter().next())
    }
}

impl LogSource for GitHub {
    async fn fetch_log(&self, url: &str) -> Result<String> {
        let url = &Url::parse(url).with_context(|| format!("Invalid log URL {url}"))?;
        with_retry(self.retry, "Fetching step log", || self.get_text(url))
            .await
            .with_context(|| format!("Failed to fetch step log {url}"))
    }

    async fn download_job_logs(&self, job_id: u64) -> Result<Bytes> {
        let url = &job_logs_url(&self.api_base, &self.repo, job_id)?;
        with_retry(self.retry, "Downloading job logs", || async move {
            let response = self
                .get(url)
                .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION)
                .send()
                .await?
                .error_for_status()?;
            Ok(response.bytes().await?)
        })
        .await
        .with_context(|| format!("Failed to download logs for job {job_id}"))
    }
}

impl StepMetadataSource for GitHub {
    async fn step_metadata(&self, run_id: u64, job_id: u64) -> Result<HashMap<u32, StepMetadata>> {
        let url = &job_page_url(&self.web_base, &self.repo, run_id, job_id)?;
        let html = with_retry(self.retry, "Fetching job page", || self.get_text(url))
            .await
            .with_context(|| format!("Failed to load job page {url}"))?;
        let steps = parse_check_steps(&html, &self.web_base);
        tracing::debug!("Job {} page lists {} steps", job_id, steps.len());
        Ok(steps)
    }
}
