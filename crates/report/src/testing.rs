//! In-memory stand-ins for the GitHub client.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use bytes::Bytes;
use runlens_core::models::{JobStep, WorkflowJob, WorkflowRun};
use runlens_github::{
    api::ActionsApi,
    metadata::StepMetadata,
    retriever::{LogSource, StepMetadataSource},
};

pub const LOG_HOST: &str = "https://logs.test";

#[derive(Default)]
pub struct FakeGitHub {
    pub run: Option<WorkflowRun>,
    pub jobs: Vec<WorkflowJob>,
    pub logs: HashMap<(u64, u32), String>,
    pub job_fetches: Mutex<Vec<u64>>,
    pub log_fetches: AtomicU32,
}

pub fn step(number: u32, name: &str, conclusion: &str) -> JobStep {
    JobStep {
        number,
        name: name.to_string(),
        status: Some("completed".to_string()),
        conclusion: Some(conclusion.to_string()),
        ..Default::default()
    }
}

pub fn job(id: u64, name: &str, conclusion: &str, steps: Vec<JobStep>) -> WorkflowJob {
    WorkflowJob {
        id,
        name: name.to_string(),
        status: Some("completed".to_string()),
        conclusion: Some(conclusion.to_string()),
        html_url: Some(format!("https://github.com/o/r/actions/runs/1/job/{id}")),
        steps,
        ..Default::default()
    }
}

pub fn run(id: u64) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("nightly".to_string()),
        status: Some("completed".to_string()),
        conclusion: Some("failure".to_string()),
        html_url: Some(format!("https://github.com/o/r/actions/runs/{id}")),
        ..Default::default()
    }
}

impl FakeGitHub {
    pub fn with_log(mut self, job_id: u64, step_number: u32, log: &str) -> Self {
        self.logs.insert((job_id, step_number), log.to_string());
        self
    }
}

impl ActionsApi for FakeGitHub {
    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun> {
        self.run
            .clone()
            .filter(|r| r.id == run_id)
            .ok_or_else(|| anyhow!("API request failed (404): Not Found"))
    }

    async fn list_jobs(&self, _run_id: u64) -> Result<Vec<WorkflowJob>> {
        // Steps only come with job details.
        Ok(self.jobs.iter().map(|j| WorkflowJob { steps: vec![], ..j.clone() }).collect())
    }

    async fn get_job(&self, job_id: u64) -> Result<WorkflowJob> {
        self.job_fetches.lock().unwrap().push(job_id);
        self.jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or_else(|| anyhow!("API request failed (404): job {job_id}"))
    }

    async fn latest_run(&self, _workflow: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.run.clone())
    }
}

impl LogSource for FakeGitHub {
    async fn fetch_log(&self, url: &str) -> Result<String> {
        self.log_fetches.fetch_add(1, Ordering::SeqCst);
        let key = url
            .strip_prefix(LOG_HOST)
            .and_then(|path| {
                let mut parts = path.trim_start_matches('/').split('/');
                Some((parts.next()?.parse().ok()?, parts.next()?.parse().ok()?))
            })
            .ok_or_else(|| anyhow!("Unexpected log URL {url}"))?;
        self.logs.get(&key).cloned().ok_or_else(|| anyhow!("HTTP 404 for {url}"))
    }

    async fn download_job_logs(&self, job_id: u64) -> Result<Bytes> {
        bail!("HTTP 404 for job {job_id} logs")
    }
}

impl StepMetadataSource for FakeGitHub {
    async fn step_metadata(
        &self,
        _run_id: u64,
        job_id: u64,
    ) -> Result<HashMap<u32, StepMetadata>> {
        Ok(self
            .logs
            .keys()
            .filter(|(job, _)| *job == job_id)
            .map(|&(job, number)| {
                (number, StepMetadata {
                    number,
                    name: None,
                    conclusion: None,
                    log_url: Some(format!("{LOG_HOST}/{job}/{number}")),
                })
            })
            .collect())
    }
}
