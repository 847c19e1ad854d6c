use std::{future::Future, time::Instant};

use anyhow::{Context, Result, bail};
use runlens_core::{
    models::{
        FailingJob, FailingStep, FailureReport, JobStep, NamespaceInfo, ReportSummary,
        RunSnapshot, TimingEntry, Timings, WorkflowJob,
    },
    util::step_url,
};
use runlens_github::{
    api::ActionsApi,
    retriever::{LogCache, LogSource, StepLogRetriever, StepMetadataSource},
};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use crate::{
    enrich::{Enricher, OpenAiSummarizer},
    extractor::{ExtractOptions, extract_error_contexts},
    namespace::NamespaceResolver,
    progress::{ProgressEvent, ProgressReporter, StepRef, emit},
};

#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub repo: String,
    pub run_id: u64,
    /// Keep each step's full log in the report.
    pub include_logs: bool,
    pub include_timings: bool,
}

#[derive(Debug, Clone, Copy)]
enum Bucket {
    Phase,
    Job,
    Step,
    LogDownload,
    Extraction,
}

/// Collects timing entries relative to the start of a generation.
struct Recorder {
    origin: Instant,
    timings: Timings,
}

fn round_ms(value: f64) -> f64 { (value * 1000.0).round() / 1000.0 }

impl Recorder {
    fn new() -> Self {
        let started_at_epoch_ms =
            (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        Self {
            origin: Instant::now(),
            timings: Timings { started_at_epoch_ms, ..Default::default() },
        }
    }

    fn now(&self) -> f64 { round_ms(self.origin.elapsed().as_secs_f64() * 1000.0) }

    /// Record an entry that started at `started_at_ms` and ends now. Returns its duration.
    fn record(
        &mut self,
        bucket: Bucket,
        name: &str,
        started_at_ms: f64,
        meta: Map<String, Value>,
        error: Option<String>,
    ) -> f64 {
        let ended_at_ms = self.now();
        let duration_ms = round_ms(ended_at_ms - started_at_ms);
        let entry = TimingEntry {
            name: name.to_string(),
            started_at_ms,
            ended_at_ms,
            duration_ms,
            meta,
            error,
        };
        match bucket {
            Bucket::Phase => self.timings.phases.push(entry),
            Bucket::Job => self.timings.job_phases.push(entry),
            Bucket::Step => self.timings.step_timings.push(entry),
            Bucket::LogDownload => self.timings.step_log_downloads.push(entry),
            Bucket::Extraction => self.timings.context_extraction.push(entry),
        }
        duration_ms
    }

    fn finish(mut self) -> Timings {
        self.timings.total_duration_ms = Some(self.now());
        self.timings
    }
}

fn meta(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A measured unit of work: where its timing goes and how its progress events are named.
struct Phase {
    bucket: Bucket,
    /// Timing entry name.
    name: &'static str,
    /// Progress event name, when it differs from the timing name.
    event: Option<String>,
    label: String,
    meta: Map<String, Value>,
}

impl Phase {
    fn new(bucket: Bucket, name: &'static str, label: impl Into<String>) -> Self {
        Self { bucket, name, event: None, label: label.into(), meta: Map::new() }
    }

    fn event(mut self, event: String) -> Self {
        self.event = Some(event);
        self
    }

    fn meta(mut self, value: Value) -> Self {
        self.meta = meta(value);
        self
    }
}

/// Builds failure reports for workflow runs.
pub struct ReportGenerator<'a, G> {
    github: &'a G,
    cache: &'a LogCache,
    namespace: Option<&'a NamespaceResolver>,
    progress: &'a dyn ProgressReporter,
}

impl<'a, G> ReportGenerator<'a, G>
where G: ActionsApi + LogSource + StepMetadataSource
{
    pub fn new(github: &'a G, cache: &'a LogCache, progress: &'a dyn ProgressReporter) -> Self {
        Self { github, cache, namespace: None, progress }
    }

    pub fn with_namespace(mut self, resolver: &'a NamespaceResolver) -> Self {
        self.namespace = Some(resolver);
        self
    }

    pub async fn generate(&self, request: &ReportRequest) -> Result<FailureReport> {
        self.generate_with(request, None::<&OpenAiSummarizer>).await
    }

    /// Generate the report, then hand it to `enricher`. Enrichment failures are stored in
    /// `aiSummary` rather than returned.
    pub async fn generate_with<E: Enricher>(
        &self,
        request: &ReportRequest,
        enricher: Option<&E>,
    ) -> Result<FailureReport> {
        if request.repo.trim().is_empty() {
            bail!("Repository must not be empty");
        }
        if request.run_id == 0 {
            bail!("Run ID must be a positive integer");
        }
        self.cache.clear();
        let mut recorder = Recorder::new();
        let run_id = request.run_id;
        let retriever = StepLogRetriever::new(self.github, run_id, self.cache);

        let run = self
            .measure(
                &mut recorder,
                Phase::new(Bucket::Phase, "actions.getRun", "Fetching workflow run"),
                self.github.get_run(run_id),
                |run, _| {
                    let conclusion = run.conclusion.as_deref().unwrap_or("unknown");
                    Some(format!("conclusion: {conclusion}"))
                },
            )
            .await?;
        let jobs = self
            .measure(
                &mut recorder,
                Phase::new(Bucket::Phase, "actions.listJobs", "Listing workflow jobs"),
                self.github.list_jobs(run_id),
                |jobs, _| Some(format!("{} jobs", jobs.len())),
            )
            .await?;

        let namespace = match self.namespace {
            Some(resolver) => self
                .measure(
                    &mut recorder,
                    Phase::new(Bucket::Phase, "resolveNamespace", "Resolving namespace"),
                    resolver.resolve(&jobs, self.github, &retriever),
                    |info, _| {
                        Some(match info.as_ref().and_then(|i| i.namespace.as_deref()) {
                            Some(namespace) => format!("namespace: {namespace}"),
                            None => "namespace unavailable".to_string(),
                        })
                    },
                )
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to resolve namespace: {:#}", e);
                    None
                }),
            None => None,
        };

        let mut failing_jobs = vec![];
        for job in jobs.iter().filter(|j| j.is_failure()) {
            let phase = Phase::new(
                Bucket::Job,
                "actions.getJob",
                format!("Fetching job details for \"{}\"", job.name),
            )
            .event(format!("actions.getJob:{}", job.id))
            .meta(json!({"jobId": job.id, "jobName": job.name}));
            let detail = self
                .measure(&mut recorder, phase, self.github.get_job(job.id), |detail, _| {
                    let failing = detail.steps.iter().filter(|s| s.is_failure()).count();
                    Some(format!("{failing} failing steps"))
                })
                .await?;
            if !detail.steps.iter().any(JobStep::is_failure) {
                tracing::info!("Job {} ({}) has no failing steps, skipping", job.id, job.name);
                continue;
            }
            failing_jobs.push(
                self.process_job(&mut recorder, &retriever, &detail, namespace.as_ref(), request)
                    .await?,
            );
        }

        let mut report = FailureReport {
            repo: request.repo.clone(),
            run: RunSnapshot::from(&run),
            summary: ReportSummary::aggregate(jobs.len(), &failing_jobs),
            namespace: namespace.as_ref().and_then(|i| i.namespace.clone()),
            grafana_url: namespace.as_ref().and_then(|i| i.grafana_url.clone()),
            jobs: failing_jobs,
            timings: None,
            ai_summary: None,
        };
        tracing::info!(
            "Run {}: {} failing jobs, {} error contexts",
            run_id,
            report.summary.failing_jobs,
            report.summary.error_context_count
        );

        if let Some(enricher) = enricher {
            let result = self
                .measure(
                    &mut recorder,
                    Phase::new(Bucket::Phase, "ai.summarize", "Generating AI summaries"),
                    enricher.enrich(&mut report),
                    |_, _| None,
                )
                .await;
            if let Err(e) = result {
                tracing::warn!("AI enrichment failed: {:#}", e);
                report.ai_summary = Some(json!({"status": "error", "error": format!("{e:#}")}));
            }
        }

        if request.include_timings {
            report.timings = Some(recorder.finish());
        }
        Ok(report)
    }

    /// Run `fut` as `phase`, emitting progress events and recording its timing. `summarize`
    /// gives the completion summary and may add to the timing meta.
    async fn measure<T>(
        &self,
        recorder: &mut Recorder,
        phase: Phase,
        fut: impl Future<Output = Result<T>>,
        summarize: impl FnOnce(&T, &mut Map<String, Value>) -> Option<String>,
    ) -> Result<T> {
        let Phase { bucket, name, event, label, mut meta } = phase;
        let event = event.unwrap_or_else(|| name.to_string());
        emit(self.progress, ProgressEvent::PhaseStart { name: event.clone(), label: label.clone() });
        let started = recorder.now();
        match fut.await {
            Ok(value) => {
                let summary = summarize(&value, &mut meta);
                let duration_ms = recorder.record(bucket, name, started, meta, None);
                emit(self.progress, ProgressEvent::PhaseComplete {
                    name: event,
                    label,
                    duration_ms,
                    summary,
                });
                Ok(value)
            }
            Err(e) => {
                let error = format!("{e:#}");
                let duration_ms = recorder.record(bucket, name, started, meta, Some(error.clone()));
                emit(self.progress, ProgressEvent::PhaseError {
                    name: event,
                    label,
                    duration_ms,
                    error,
                });
                Err(e)
            }
        }
    }

    async fn process_job(
        &self,
        recorder: &mut Recorder,
        retriever: &StepLogRetriever<'_, G>,
        job: &WorkflowJob,
        namespace: Option<&NamespaceInfo>,
        request: &ReportRequest,
    ) -> Result<FailingJob> {
        let failing: Vec<&JobStep> = job.steps.iter().filter(|s| s.is_failure()).collect();
        emit(self.progress, ProgressEvent::JobStart {
            job_id: job.id,
            job_name: job.name.clone(),
            failing_step_count: failing.len(),
        });
        let started = recorder.now();
        let mut steps = Vec::with_capacity(failing.len());
        for step in failing {
            steps.push(self.process_step(recorder, retriever, job, step, namespace, request).await?);
        }
        let duration_ms = recorder.record(
            Bucket::Job,
            "job.processFailingSteps",
            started,
            meta(json!({"jobId": job.id, "stepCount": steps.len()})),
            None,
        );
        emit(self.progress, ProgressEvent::JobComplete {
            job_id: job.id,
            job_name: job.name.clone(),
            duration_ms,
            step_count: steps.len(),
        });
        Ok(FailingJob {
            id: job.id,
            name: job.name.clone(),
            status: job.status.clone(),
            conclusion: job.conclusion.clone(),
            started_at: job.started_at.clone(),
            completed_at: job.completed_at.clone(),
            html_url: job.html_url.clone(),
            steps,
        })
    }

    async fn process_step(
        &self,
        recorder: &mut Recorder,
        retriever: &StepLogRetriever<'_, G>,
        job: &WorkflowJob,
        step: &JobStep,
        namespace: Option<&NamespaceInfo>,
        request: &ReportRequest,
    ) -> Result<FailingStep> {
        let step_ref = StepRef {
            job_id: job.id,
            job_name: job.name.clone(),
            step_number: step.number,
            step_name: step.name.clone(),
        };
        emit(self.progress, ProgressEvent::StepStart(step_ref.clone()));
        let started = recorder.now();

        emit(self.progress, ProgressEvent::StepLogFetchStart(step_ref.clone()));
        let fetch_started = recorder.now();
        let from_cache = retriever.is_cached(job.id, step.number);
        let fetched = retriever.resolve_named(job.id, step.number, Some(&step.name)).await;
        let (tier, error) = match &fetched {
            Ok(result) => (Some(result.tier), None),
            Err(e) => (None, Some(format!("{e:#}"))),
        };
        let fetch_ms = recorder.record(
            Bucket::LogDownload,
            "stepLog.fetch",
            fetch_started,
            meta(json!({
                "jobId": job.id,
                "jobName": job.name,
                "stepNumber": step.number,
                "stepName": step.name,
                "fromCache": from_cache,
                "tier": tier.map(|t| t.as_str()),
            })),
            error.clone(),
        );
        emit(self.progress, ProgressEvent::StepLogFetchComplete {
            step: step_ref.clone(),
            duration_ms: fetch_ms,
            from_cache,
            tier,
            error,
        });
        let log = fetched.with_context(|| {
            format!("Failed to fetch log for job {} ({}) step {}", job.id, job.name, step.number)
        })?;

        let options = ExtractOptions {
            step_name: Some(&step.name),
            job_name: Some(&job.name),
            allow_final_error_fallback: true,
        };
        let phase = Phase::new(
            Bucket::Extraction,
            "logs.extractErrorContexts",
            format!("Extracting error contexts for step {}", step.number),
        )
        .meta(json!({
            "jobId": job.id,
            "jobName": job.name,
            "stepNumber": step.number,
            "stepName": step.name,
        }));
        let mut contexts = self
            .measure(
                recorder,
                phase,
                async { Ok(extract_error_contexts(&log.log, &options)) },
                |contexts, meta| {
                    meta.insert("contextCount".to_string(), contexts.len().into());
                    Some(format!("{} contexts", contexts.len()))
                },
            )
            .await?;
        if let (Some(resolver), Some(namespace)) =
            (self.namespace, namespace.and_then(|i| i.namespace.as_deref()))
        {
            for ctx in &mut contexts {
                ctx.grafana_url = Some(resolver.grafana().for_context(
                    namespace,
                    ctx.start_timestamp,
                    ctx.end_timestamp,
                ));
            }
        }

        let duration_ms = recorder.record(
            Bucket::Step,
            "step.process",
            started,
            meta(json!({
                "jobId": job.id,
                "stepNumber": step.number,
                "contextCount": contexts.len(),
            })),
            None,
        );
        emit(self.progress, ProgressEvent::StepComplete {
            step: step_ref,
            duration_ms,
            context_count: contexts.len(),
        });
        Ok(FailingStep {
            number: step.number,
            name: step.name.clone(),
            status: step.status.clone(),
            conclusion: step.conclusion.clone(),
            started_at: step.started_at.clone(),
            completed_at: step.completed_at.clone(),
            log_url: log.log_url.clone(),
            log_source: Some(log.tier),
            step_url: if contexts.is_empty() {
                None
            } else {
                job.html_url.as_deref().and_then(|url| step_url(url, step.number))
            },
            error_contexts: contexts,
            raw_log: request.include_logs.then_some(log.log),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::Ordering};

    use runlens_core::{config::NamespaceConfig, models::LogTier};

    use super::*;
    use crate::{
        progress::NoopReporter,
        testing::{FakeGitHub, job, run, step},
    };

    const NAMESPACE: &str = "mo-branch-commit-2d3495d5-20251104";

    fn request() -> ReportRequest {
        ReportRequest { repo: "o/r".to_string(), run_id: 7, ..Default::default() }
    }

    fn error_log() -> String {
        let mut lines: Vec<String> = (0..12).map(|i| format!("running case {i}")).collect();
        lines.push("##[error]assertion failed: boom".to_string());
        lines.extend((0..12).map(|i| format!("cleanup {i}")));
        lines.join("\n")
    }

    /// Five jobs: two failed, one of which has no failing step.
    fn github() -> FakeGitHub {
        FakeGitHub {
            run: Some(run(7)),
            jobs: vec![
                job(1, "lint", "success", vec![step(1, "Run lint", "success")]),
                job(2, "test", "failure", vec![
                    step(1, "Set up job", "success"),
                    step(2, "Run tests", "failure"),
                    step(3, "Upload", "skipped"),
                ]),
                job(3, "deploy", "failure", vec![step(1, "Deploy", "success")]),
                job(4, "docs", "success", vec![]),
                job(5, "bench", "cancelled", vec![]),
            ],
            ..Default::default()
        }
        .with_log(2, 2, &error_log())
    }

    struct Failing;

    impl Enricher for Failing {
        async fn enrich(&self, _report: &mut FailureReport) -> Result<()> {
            bail!("quota exceeded")
        }
    }

    struct Tagging;

    impl Enricher for Tagging {
        async fn enrich(&self, report: &mut FailureReport) -> Result<()> {
            report.ai_summary = Some(json!({"status": "ok"}));
            Ok(())
        }
    }

    fn label(event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::PhaseStart { name, .. } => format!("phase-start {name}"),
            ProgressEvent::PhaseComplete { name, .. } => format!("phase-complete {name}"),
            ProgressEvent::PhaseError { name, .. } => format!("phase-error {name}"),
            ProgressEvent::JobStart { job_id, .. } => format!("job-start {job_id}"),
            ProgressEvent::JobComplete { job_id, .. } => format!("job-complete {job_id}"),
            ProgressEvent::StepStart(step) => format!("step-start {}", step.step_number),
            ProgressEvent::StepComplete { step, .. } => format!("step-complete {}", step.step_number),
            ProgressEvent::StepLogFetchStart(step) => format!("fetch-start {}", step.step_number),
            ProgressEvent::StepLogFetchComplete { step, .. } => {
                format!("fetch-complete {}", step.step_number)
            }
        }
    }

    #[tokio::test]
    async fn test_generate_report() {
        let github = github();
        let cache = LogCache::new();
        let report =
            ReportGenerator::new(&github, &cache, &NoopReporter).generate(&request()).await.unwrap();
        assert_eq!(report.repo, "o/r");
        assert_eq!(report.run.id, 7);
        assert_eq!(report.summary.total_jobs, 5);
        assert_eq!(report.summary.failing_jobs, 1);
        assert_eq!(report.summary.error_context_count, 1);
        assert_eq!(report.jobs.len(), 1);
        let job = &report.jobs[0];
        assert_eq!(job.id, 2);
        assert_eq!(job.steps.len(), 1);
        let step = &job.steps[0];
        assert_eq!(step.number, 2);
        assert_eq!(step.log_source, Some(LogTier::Direct));
        assert_eq!(step.log_url.as_deref(), Some("https://logs.test/2/2"));
        assert_eq!(
            step.step_url.as_deref(),
            Some("https://github.com/o/r/actions/runs/1/job/2?check_suite_focus=true#step:2:1")
        );
        assert_eq!(step.raw_log, None);
        assert!(step.error_contexts[0].snippet.contains("boom"));
        assert_eq!(step.error_contexts[0].grafana_url, None);
        assert_eq!(report.namespace, None);
        assert_eq!(report.timings, None);
        assert_eq!(report.ai_summary, None);
        assert_eq!(*github.job_fetches.lock().unwrap(), vec![2, 3]);
        assert_eq!(github.log_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_validates_input() {
        let github = github();
        let cache = LogCache::new();
        let generator = ReportGenerator::new(&github, &cache, &NoopReporter);
        let empty_repo = ReportRequest { repo: " ".to_string(), ..request() };
        assert!(generator.generate(&empty_repo).await.is_err());
        let zero_run = ReportRequest { run_id: 0, ..request() };
        assert!(generator.generate(&zero_run).await.is_err());
        assert!(github.job_fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_with_namespace() {
        let mut github = github();
        github.jobs.push(job(6, "SETUP MO TEST ENV", "success", vec![step(
            4,
            "Clean TKE Env",
            "success",
        )]));
        let github = github
            .with_log(6, 4, &format!("No resources found in {NAMESPACE} namespace."))
            .with_log(
                2,
                2,
                "2024-05-01T10:00:01Z starting\n2024-05-01T10:00:02Z ERROR boom\n2024-05-01T10:00:03Z done",
            );
        let cache = LogCache::new();
        let resolver = NamespaceResolver::new(&NamespaceConfig::default()).unwrap();
        let report = ReportGenerator::new(&github, &cache, &NoopReporter)
            .with_namespace(&resolver)
            .generate(&request())
            .await
            .unwrap();
        assert_eq!(report.namespace.as_deref(), Some(NAMESPACE));
        assert!(report.grafana_url.as_deref().unwrap().contains(NAMESPACE));
        let ctx = &report.jobs[0].steps[0].error_contexts[0];
        assert_eq!(ctx.start_timestamp, Some(1_714_557_601_000));
        assert_eq!(ctx.end_timestamp, Some(1_714_557_603_000));
        let url = ctx.grafana_url.as_deref().unwrap();
        assert!(url.contains("1714557601000"));
        assert!(url.contains("1714557603000"));
    }

    #[tokio::test]
    async fn test_namespace_failure_is_tolerated() {
        let mut github = github();
        // The cleanup step has no log, so resolving it fails.
        github.jobs.push(job(6, "SETUP MO TEST ENV", "success", vec![step(
            4,
            "Clean TKE Env",
            "success",
        )]));
        let cache = LogCache::new();
        let resolver = NamespaceResolver::new(&NamespaceConfig::default()).unwrap();
        let events = Mutex::new(vec![]);
        let reporter = |event: &ProgressEvent| events.lock().unwrap().push(label(event));
        let report = ReportGenerator::new(&github, &cache, &reporter)
            .with_namespace(&resolver)
            .generate(&request())
            .await
            .unwrap();
        assert_eq!(report.namespace, None);
        assert_eq!(report.jobs.len(), 1);
        assert!(events.lock().unwrap().contains(&"phase-error resolveNamespace".to_string()));
    }

    #[tokio::test]
    async fn test_step_log_failure_fails_generation() {
        let mut github = github();
        github.logs.clear();
        let cache = LogCache::new();
        let events = Mutex::new(vec![]);
        let reporter = |event: &ProgressEvent| events.lock().unwrap().push(event.clone());
        let err = ReportGenerator::new(&github, &cache, &reporter)
            .generate(&request())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to fetch log for job 2"));
        let events = events.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::StepLogFetchComplete { error: Some(_), tier: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_order() {
        let github = github();
        let cache = LogCache::new();
        let events = Mutex::new(vec![]);
        let reporter = |event: &ProgressEvent| events.lock().unwrap().push(label(event));
        ReportGenerator::new(&github, &cache, &reporter).generate(&request()).await.unwrap();
        assert_eq!(*events.lock().unwrap(), vec![
            "phase-start actions.getRun",
            "phase-complete actions.getRun",
            "phase-start actions.listJobs",
            "phase-complete actions.listJobs",
            "phase-start actions.getJob:2",
            "phase-complete actions.getJob:2",
            "job-start 2",
            "step-start 2",
            "fetch-start 2",
            "fetch-complete 2",
            "phase-start logs.extractErrorContexts",
            "phase-complete logs.extractErrorContexts",
            "step-complete 2",
            "job-complete 2",
            "phase-start actions.getJob:3",
            "phase-complete actions.getJob:3",
        ]);
    }

    #[tokio::test]
    async fn test_enrichment() {
        let github = github();
        let cache = LogCache::new();
        let generator = ReportGenerator::new(&github, &cache, &NoopReporter);
        let report = generator.generate_with(&request(), Some(&Tagging)).await.unwrap();
        assert_eq!(report.ai_summary, Some(json!({"status": "ok"})));
        let report = generator.generate_with(&request(), Some(&Failing)).await.unwrap();
        assert_eq!(report.ai_summary, Some(json!({"status": "error", "error": "quota exceeded"})));
        assert_eq!(report.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_timings_and_logs() {
        let github = github();
        let cache = LogCache::new();
        let request = ReportRequest { include_logs: true, include_timings: true, ..request() };
        let report =
            ReportGenerator::new(&github, &cache, &NoopReporter).generate(&request).await.unwrap();
        assert_eq!(report.jobs[0].steps[0].raw_log.as_deref(), Some(error_log().as_str()));
        let timings = report.timings.unwrap();
        assert!(timings.started_at_epoch_ms > 0);
        assert!(timings.total_duration_ms.is_some());
        let phases: Vec<&str> = timings.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(phases, ["actions.getRun", "actions.listJobs"]);
        let jobs: Vec<&str> = timings.job_phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(jobs, ["actions.getJob", "job.processFailingSteps", "actions.getJob"]);
        assert_eq!(timings.job_phases[0].meta["jobId"], 2);
        assert_eq!(timings.job_phases[0].meta["jobName"], "test");
        assert_eq!(timings.job_phases[2].meta["jobId"], 3);
        assert_eq!(timings.step_timings.len(), 1);
        assert_eq!(timings.step_timings[0].meta["contextCount"], 1);
        assert_eq!(timings.step_log_downloads[0].meta["tier"], "direct");
        assert_eq!(timings.step_log_downloads[0].meta["fromCache"], false);
        assert_eq!(timings.step_log_downloads[0].meta["stepName"], "Run tests");
        assert_eq!(timings.context_extraction.len(), 1);
        let extraction = &timings.context_extraction[0].meta;
        assert_eq!(extraction["jobName"], "test");
        assert_eq!(extraction["stepNumber"], 2);
        assert_eq!(extraction["stepName"], "Run tests");
        assert_eq!(extraction["contextCount"], 1);
        for entry in timings.phases.iter().chain(&timings.step_timings) {
            assert!(entry.ended_at_ms >= entry.started_at_ms);
        }
    }
}
