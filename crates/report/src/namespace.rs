use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use runlens_core::{
    config::{GrafanaConfig, NamespaceConfig},
    models::{JobStep, NamespaceInfo, WorkflowJob, WorkflowRun},
};
use runlens_github::{
    api::ActionsApi,
    retriever::{LogCache, LogSource, StepLogRetriever, StepMetadataSource},
};
use serde_json::json;
use url::Url;

static NAMESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No resources found in ([a-zA-Z0-9-]+) namespace").unwrap());

/// The deployment namespace announced by the environment cleanup step, if any.
pub fn extract_namespace(log: &str) -> Option<&str> {
    NAMESPACE_REGEX.captures(log).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Builds Grafana Explore links querying a namespace's Loki logs.
#[derive(Debug, Clone)]
pub struct GrafanaLinks {
    base: Url,
    app: String,
    regex: String,
}

impl GrafanaLinks {
    pub fn new(config: &GrafanaConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid Grafana base URL {}", config.base_url))?;
        Ok(Self { base, app: config.app.clone(), regex: config.regex.clone() })
    }

    /// Explore URL for `namespace`. `range` is a pair of epoch milliseconds; without one the
    /// last three hours are shown.
    pub fn url(&self, namespace: &str, range: Option<(i64, i64)>) -> String {
        let expr = format!(
            "{{namespace=\"{}\", app=\"{}\"}} |~ `{}`",
            namespace, self.app, self.regex
        );
        let (from, to) = match range {
            Some((from, to)) => (from.to_string(), to.to_string()),
            None => ("now-3h".to_string(), "now".to_string()),
        };
        let panes = json!({
            "KMD": {
                "datasource": "loki",
                "queries": [{
                    "refId": "A",
                    "expr": expr,
                    "queryType": "range",
                    "datasource": {"type": "loki", "uid": "loki"},
                    "editorMode": "builder",
                }],
                "range": {"from": from, "to": to},
            }
        });
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("panes", &panes.to_string())
            .append_pair("schemaVersion", "1")
            .append_pair("orgId", "1");
        url.to_string()
    }

    /// Link for an error context: its own time span when both ends are known, the default
    /// range otherwise.
    pub fn for_context(&self, namespace: &str, start: Option<i64>, end: Option<i64>) -> String {
        match (start, end) {
            (Some(start), Some(end)) => self.url(namespace, Some((start.min(end), start.max(end)))),
            _ => self.url(namespace, None),
        }
    }
}

fn normalize(value: &str) -> String { value.trim().to_lowercase() }

/// Exact (case-insensitive) name match first, then substring match.
fn select_by_name<'a, T>(
    items: &'a [T],
    keyword: &str,
    name: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    items
        .iter()
        .find(|&item| normalize(name(item)) == keyword)
        .or_else(|| items.iter().find(|&item| normalize(name(item)).contains(keyword)))
}

/// Locates the deployment namespace of a run from its environment setup job.
pub struct NamespaceResolver {
    job_keyword: String,
    step_keyword: String,
    grafana: GrafanaLinks,
}

impl NamespaceResolver {
    pub fn new(config: &NamespaceConfig) -> Result<Self> {
        Ok(Self {
            job_keyword: normalize(&config.job_keyword),
            step_keyword: normalize(&config.step_keyword),
            grafana: GrafanaLinks::new(&config.grafana)?,
        })
    }

    pub fn grafana(&self) -> &GrafanaLinks { &self.grafana }

    /// Returns `None` when the run has no environment setup job or cleanup step.
    pub async fn resolve<A, S>(
        &self,
        jobs: &[WorkflowJob],
        api: &A,
        retriever: &StepLogRetriever<'_, S>,
    ) -> Result<Option<NamespaceInfo>>
    where
        A: ActionsApi,
        S: LogSource + StepMetadataSource,
    {
        let Some(job) = select_by_name(jobs, &self.job_keyword, |j: &WorkflowJob| &j.name) else {
            tracing::debug!("No job matching '{}'", self.job_keyword);
            return Ok(None);
        };
        let details = api.get_job(job.id).await?;
        let Some(step) = select_by_name(&details.steps, &self.step_keyword, |s: &JobStep| &s.name)
        else {
            tracing::debug!("Job {} has no step matching '{}'", job.id, self.step_keyword);
            return Ok(None);
        };
        let result = retriever
            .resolve_named(job.id, step.number, Some(&step.name))
            .await
            .with_context(|| {
                format!("Failed to fetch log of step {} ({})", step.number, step.name)
            })?;
        let namespace = extract_namespace(&result.log).map(str::to_string);
        match &namespace {
            Some(namespace) => tracing::info!("Resolved namespace {}", namespace),
            None => tracing::info!("No namespace found in job {} step {}", job.id, step.number),
        }
        Ok(Some(NamespaceInfo {
            grafana_url: namespace.as_deref().map(|ns| self.grafana.url(ns, None)),
            namespace,
            log_url: result.log_url,
            step: step.clone(),
            job: WorkflowJob { steps: vec![], ..details },
        }))
    }

    /// Resolves the namespace of the most recent run of `workflow`.
    pub async fn resolve_latest<G>(
        &self,
        workflow: &str,
        github: &G,
        cache: &LogCache,
    ) -> Result<(WorkflowRun, Option<NamespaceInfo>)>
    where
        G: ActionsApi + LogSource + StepMetadataSource,
    {
        let run = github
            .latest_run(workflow)
            .await?
            .with_context(|| format!("No workflow runs found for workflow \"{workflow}\""))?;
        tracing::info!("Latest run of {} is {}", workflow, run.id);
        let jobs = github.list_jobs(run.id).await?;
        let retriever = StepLogRetriever::new(github, run.id, cache);
        let info = self.resolve(&jobs, github, &retriever).await?;
        Ok((run, info))
    }
}
