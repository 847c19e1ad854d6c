use std::{collections::HashMap, future::Future, sync::Arc};

use anyhow::{Result, anyhow, bail};
use bytes::Bytes;
use moka::future::Cache;
use runlens_core::{
    models::{LogTier, StepLogResult},
    util::size,
};

use crate::{
    archive::{ArchiveKind, JobArchive},
    metadata::StepMetadata,
};

/// Raw log transport: direct per-step URLs and whole-job log downloads.
pub trait LogSource: Send + Sync {
    fn fetch_log(&self, url: &str) -> impl Future<Output = Result<String>> + Send;

    /// The job's log download, either a zip bundle or a single plaintext log.
    fn download_job_logs(&self, job_id: u64) -> impl Future<Output = Result<Bytes>> + Send;
}

pub trait StepMetadataSource: Send + Sync {
    fn step_metadata(
        &self,
        run_id: u64,
        job_id: u64,
    ) -> impl Future<Output = Result<HashMap<u32, StepMetadata>>> + Send;
}

pub type StepMetadataMap = Arc<HashMap<u32, StepMetadata>>;

/// Caches shared by the retrievers of one report generation.
#[derive(Clone)]
pub struct LogCache {
    steps: Cache<(u64, u32), StepLogResult>,
    archives: Cache<u64, Arc<JobArchive>>,
    metadata: Cache<u64, StepMetadataMap>,
}

impl Default for LogCache {
    fn default() -> Self { Self::new() }
}

impl LogCache {
    pub fn new() -> Self {
        Self {
            steps: Cache::builder()
                .weigher(|_, v: &StepLogResult| v.log.len().try_into().unwrap_or(u32::MAX))
                .max_capacity(256 * 1024 * 1024) // 256 MB
                .build(),
            archives: Cache::builder()
                .weigher(|_, v: &Arc<JobArchive>| v.size().try_into().unwrap_or(u32::MAX))
                .max_capacity(512 * 1024 * 1024) // 512 MB
                .eviction_listener(|job_id, _v, _cause| {
                    tracing::debug!("Evicting log archive from cache: job {}", job_id);
                })
                .build(),
            metadata: Cache::builder().max_capacity(1024).build(),
        }
    }

    pub fn clear(&self) {
        self.steps.invalidate_all();
        self.archives.invalidate_all();
        self.metadata.invalidate_all();
    }
}

/// One way of obtaining a step log. Strategies are tried in order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStrategy {
    /// Fetch the step's own log URL from its metadata.
    Direct,
    /// Match the step against the files of the job's log download.
    Archive,
    /// Score the synthetic entries of a plaintext job log.
    Plaintext,
}

pub const DEFAULT_STRATEGIES: &[LogStrategy] =
    &[LogStrategy::Direct, LogStrategy::Archive, LogStrategy::Plaintext];

impl LogStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Archive => "archive",
            Self::Plaintext => "plaintext",
        }
    }
}

type StatusSink<'a> = Box<dyn Fn(&str) + Send + Sync + 'a>;
type ArchiveMemo = Option<Result<Arc<JobArchive>, String>>;

pub struct StepLogRetriever<'a, S> {
    source: &'a S,
    run_id: u64,
    cache: &'a LogCache,
    strategies: &'a [LogStrategy],
    status: Option<StatusSink<'a>>,
}

impl<'a, S> StepLogRetriever<'a, S>
where S: LogSource + StepMetadataSource
{
    pub fn new(source: &'a S, run_id: u64, cache: &'a LogCache) -> Self {
        Self { source, run_id, cache, strategies: DEFAULT_STRATEGIES, status: None }
    }

    pub fn with_strategies(mut self, strategies: &'a [LogStrategy]) -> Self {
        self.strategies = strategies;
        self
    }

    /// Receive human-readable status lines as resolution moves between strategies.
    pub fn with_status(mut self, sink: impl Fn(&str) + Send + Sync + 'a) -> Self {
        self.status = Some(Box::new(sink));
        self
    }

    fn report(&self, message: &str) {
        tracing::debug!("{}", message);
        if let Some(sink) = &self.status {
            sink(message);
        }
    }

    /// Whether the step's log is already cached.
    pub fn is_cached(&self, job_id: u64, step_number: u32) -> bool {
        self.cache.steps.contains_key(&(job_id, step_number))
    }

    pub async fn resolve(&self, job_id: u64, step_number: u32) -> Result<StepLogResult> {
        self.resolve_named(job_id, step_number, None).await
    }

    /// Resolve the log of one step. `step_name` helps archive matching when the step
    /// metadata does not carry a name.
    pub async fn resolve_named(
        &self,
        job_id: u64,
        step_number: u32,
        step_name: Option<&str>,
    ) -> Result<StepLogResult> {
        let key = (job_id, step_number);
        if let Some(result) = self.cache.steps.get(&key).await {
            tracing::debug!("Step log cache hit: job {} step {}", job_id, step_number);
            return Ok(result);
        }
        let metadata = self.step_metadata(job_id).await;
        let step = metadata.get(&step_number);
        let step_name = step_name.or_else(|| step.and_then(|s| s.name.as_deref()));
        let log_url = step.and_then(|s| s.log_url.as_deref());

        let mut archive: ArchiveMemo = None;
        let mut errors = Vec::with_capacity(self.strategies.len());
        for &strategy in self.strategies {
            let attempt = match strategy {
                LogStrategy::Direct => self.try_direct(step_number, log_url).await,
                LogStrategy::Archive => {
                    self.try_archive(job_id, step_number, step_name, log_url, &mut archive).await
                }
                LogStrategy::Plaintext => {
                    self.try_plaintext(job_id, step_number, step_name, log_url, &mut archive).await
                }
            };
            match attempt {
                Ok(result) => {
                    tracing::debug!(
                        "Resolved job {} step {} via {} ({})",
                        job_id,
                        step_number,
                        strategy.as_str(),
                        size(result.log.len() as u64)
                    );
                    self.cache.steps.insert(key, result.clone()).await;
                    return Ok(result);
                }
                Err(e) => {
                    if strategy == LogStrategy::Direct && log_url.is_some() {
                        self.report(&format!(
                            "Direct fetch failed for step {step_number}. Trying archive..."
                        ));
                    }
                    errors.push(format!("{}: {:#}", strategy.as_str(), e));
                }
            }
        }
        bail!(
            "Unable to resolve log for job {} step {}: {}",
            job_id,
            step_number,
            errors.join("; ")
        )
    }

    async fn step_metadata(&self, job_id: u64) -> StepMetadataMap {
        if let Some(metadata) = self.cache.metadata.get(&job_id).await {
            return metadata;
        }
        match self.source.step_metadata(self.run_id, job_id).await {
            Ok(metadata) => {
                let metadata = Arc::new(metadata);
                self.cache.metadata.insert(job_id, metadata.clone()).await;
                metadata
            }
            Err(e) => {
                tracing::warn!("Failed to load step metadata for job {}: {:#}", job_id, e);
                StepMetadataMap::default()
            }
        }
    }

    async fn try_direct(&self, step_number: u32, log_url: Option<&str>) -> Result<StepLogResult> {
        let Some(url) = log_url else {
            bail!("No direct log URL for step {}", step_number);
        };
        self.report(&format!("Fetching log for step {step_number}..."));
        let log = self.source.fetch_log(url).await?;
        Ok(StepLogResult {
            log,
            log_url: Some(url.to_string()),
            tier: LogTier::Direct,
            entry_name: None,
        })
    }

    async fn try_archive(
        &self,
        job_id: u64,
        step_number: u32,
        step_name: Option<&str>,
        log_url: Option<&str>,
        memo: &mut ArchiveMemo,
    ) -> Result<StepLogResult> {
        let archive = self.archive(job_id, memo).await?;
        self.report(&format!("Preparing logs for step {step_number}..."));
        let Some(entry) = archive.find_step(step_number, step_name) else {
            bail!("No log file matched step {} among {} entries", step_number, archive.len());
        };
        self.report(&format!("Archive matched: {}", entry.name));
        let tier = match archive.kind {
            ArchiveKind::Zip => LogTier::Archive,
            ArchiveKind::Plaintext => LogTier::Plaintext,
        };
        Ok(StepLogResult {
            log: entry.content.clone(),
            log_url: log_url.map(str::to_string),
            tier,
            entry_name: Some(entry.name.clone()),
        })
    }

    async fn try_plaintext(
        &self,
        job_id: u64,
        step_number: u32,
        step_name: Option<&str>,
        log_url: Option<&str>,
        memo: &mut ArchiveMemo,
    ) -> Result<StepLogResult> {
        let archive = self.archive(job_id, memo).await?;
        if archive.kind != ArchiveKind::Plaintext {
            bail!("Job log download is a zip archive");
        }
        let Some(entry) = archive.best_scored(step_number, step_name) else {
            bail!("No plaintext group matched step {}", step_number);
        };
        self.report(&format!("Archive matched: {}", entry.name));
        Ok(StepLogResult {
            log: entry.content.clone(),
            log_url: log_url.map(str::to_string),
            tier: LogTier::Plaintext,
            entry_name: Some(entry.name.clone()),
        })
    }

    /// The decoded job log download, fetched at most once per resolution and cached per job.
    async fn archive(&self, job_id: u64, memo: &mut ArchiveMemo) -> Result<Arc<JobArchive>> {
        let outcome = match memo.take() {
            Some(outcome) => outcome,
            None => match self.cache.archives.get(&job_id).await {
                Some(archive) => Ok(archive),
                None => self.download_archive(job_id).await.map_err(|e| format!("{e:#}")),
            },
        };
        let result = outcome.clone().map_err(|e| anyhow!(e));
        *memo = Some(outcome);
        result
    }

    async fn download_archive(&self, job_id: u64) -> Result<Arc<JobArchive>> {
        self.report(&format!("Downloading job logs for job {job_id}..."));
        let bytes = self.source.download_job_logs(job_id).await?;
        let archive = Arc::new(JobArchive::decode(&bytes)?);
        self.report(&format!("Job logs downloaded ({} files)", archive.len()));
        tracing::debug!(
            "Job {} log download: {} ({} entries, {:?})",
            job_id,
            size(bytes.len() as u64),
            archive.len(),
            archive.kind
        );
        self.cache.archives.insert(job_id, archive.clone()).await;
        Ok(archive)
    }
}
