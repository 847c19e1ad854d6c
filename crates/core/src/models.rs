use serde::{Deserialize, Serialize};

pub const CONCLUSION_FAILURE: &str = "failure";

pub fn is_failure(conclusion: Option<&str>) -> bool {
    conclusion.is_some_and(|c| c.trim().eq_ignore_ascii_case(CONCLUSION_FAILURE))
}

/// Workflow run as returned by `GET /repos/{owner}/{repo}/actions/runs/{run_id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub head_sha: Option<String>,
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub run_attempt: Option<u32>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

impl WorkflowJob {
    pub fn is_failure(&self) -> bool { is_failure(self.conclusion.as_deref()) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStep {
    pub number: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl JobStep {
    pub fn is_failure(&self) -> bool { is_failure(self.conclusion.as_deref()) }
}

/// One page of `GET /repos/{owner}/{repo}/actions/runs/{run_id}/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub jobs: Vec<WorkflowJob>,
}

/// One page of `GET /repos/{owner}/{repo}/actions/workflows/{workflow}/runs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowRunsPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

/// Which retrieval tier produced a step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTier {
    Direct,
    Archive,
    Plaintext,
}

impl LogTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Archive => "archive",
            Self::Plaintext => "plaintext",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLogResult {
    pub log: String,
    /// The direct log URL, if one was known for the step.
    pub log_url: Option<String>,
    pub tier: LogTier,
    /// Archive entry the log was taken from, for the archive tiers.
    pub entry_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// 1-based, inclusive.
    pub start_line: usize,
    /// Exclusive 0-based end index, equal to the 1-based inclusive last line.
    pub end_line: usize,
    pub snippet: String,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceInfo {
    pub namespace: Option<String>,
    pub log_url: Option<String>,
    pub grafana_url: Option<String>,
    /// The environment setup job, without its steps.
    pub job: WorkflowJob,
    /// The cleanup step the namespace was read from.
    pub step: JobStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub repo: String,
    pub run: RunSnapshot,
    pub summary: ReportSummary,
    pub namespace: Option<String>,
    pub grafana_url: Option<String>,
    pub jobs: Vec<FailingJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<serde_json::Value>,
}

impl FailureReport {
    pub fn contexts(&self) -> impl Iterator<Item = (&FailingJob, &FailingStep, &ErrorContext)> {
        self.jobs.iter().flat_map(|job| {
            job.steps
                .iter()
                .flat_map(move |step| step.error_contexts.iter().map(move |ctx| (job, step, ctx)))
        })
    }

    pub fn contexts_mut(&mut self) -> impl Iterator<Item = &mut ErrorContext> {
        self.jobs
            .iter_mut()
            .flat_map(|job| job.steps.iter_mut())
            .flat_map(|step| step.error_contexts.iter_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub id: u64,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub event: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: Option<String>,
    pub actor: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub run_attempt: u32,
    pub html_url: Option<String>,
}

impl From<&WorkflowRun> for RunSnapshot {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            id: run.id,
            name: run.name.clone(),
            status: run.status.clone(),
            conclusion: run.conclusion.clone(),
            event: run.event.clone(),
            head_branch: run.head_branch.clone(),
            head_sha: run.head_sha.clone(),
            actor: run.actor.as_ref().map(|a| a.login.clone()),
            created_at: run.created_at.clone(),
            updated_at: run.updated_at.clone(),
            run_attempt: run.run_attempt.unwrap_or(1),
            html_url: run.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_jobs: usize,
    pub failing_jobs: usize,
    pub error_context_count: usize,
}

impl ReportSummary {
    pub fn aggregate(total_jobs: usize, jobs: &[FailingJob]) -> Self {
        Self {
            total_jobs,
            failing_jobs: jobs.len(),
            error_context_count: jobs
                .iter()
                .flat_map(|job| &job.steps)
                .map(|step| step.error_contexts.len())
                .sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingJob {
    pub id: u64,
    pub name: String,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub html_url: Option<String>,
    pub steps: Vec<FailingStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingStep {
    pub number: u32,
    pub name: String,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub log_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_source: Option<LogTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_url: Option<String>,
    pub error_contexts: Vec<ErrorContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_log: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub started_at_epoch_ms: i64,
    pub phases: Vec<TimingEntry>,
    pub job_phases: Vec<TimingEntry>,
    pub step_timings: Vec<TimingEntry>,
    pub step_log_downloads: Vec<TimingEntry>,
    pub context_extraction: Vec<TimingEntry>,
    pub total_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingEntry {
    pub name: String,
    pub started_at_ms: f64,
    pub ended_at_ms: f64,
    pub duration_ms: f64,
    #[serde(flatten)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_failure() {
        let cases: &[(Option<&str>, bool)] = &[
            (Some("failure"), true),
            (Some("FAILURE"), true),
            (Some("success"), false),
            (Some("cancelled"), false),
            (None, false),
        ];
        for &(conclusion, expected) in cases {
            assert_eq!(is_failure(conclusion), expected, "{conclusion:?}");
        }
    }

    #[test]
    fn test_job_deserializes_from_api_payload() {
        let job: WorkflowJob = serde_json::from_value(serde_json::json!({
            "id": 42,
            "name": "build",
            "status": "completed",
            "conclusion": "failure",
            "html_url": "https://github.com/o/r/actions/runs/1/job/42",
            "labels": ["ubuntu-latest"],
            "steps": [
                {"number": 1, "name": "Set up job", "status": "completed", "conclusion": "success"},
                {"number": 2, "name": "Run tests", "status": "completed", "conclusion": "failure"}
            ]
        }))
        .unwrap();
        assert!(job.is_failure());
        assert_eq!(job.steps.iter().filter(|s| s.is_failure()).count(), 1);
    }

    #[test]
    fn test_summary_aggregates_contexts() {
        let context = ErrorContext {
            start_line: 1,
            end_line: 3,
            snippet: "boom".to_string(),
            start_timestamp: None,
            end_timestamp: None,
            grafana_url: None,
            ai_summary: None,
        };
        let step = FailingStep {
            number: 2,
            name: "Run tests".to_string(),
            status: None,
            conclusion: Some("failure".to_string()),
            started_at: None,
            completed_at: None,
            log_url: None,
            log_source: None,
            step_url: None,
            error_contexts: vec![context.clone(), context],
            raw_log: None,
        };
        let job = FailingJob {
            id: 1,
            name: "build".to_string(),
            status: None,
            conclusion: Some("failure".to_string()),
            started_at: None,
            completed_at: None,
            html_url: None,
            steps: vec![step.clone(), step],
        };
        let summary = ReportSummary::aggregate(7, &[job]);
        assert_eq!(summary, ReportSummary { total_jobs: 7, failing_jobs: 1, error_context_count: 4 });
    }
}
