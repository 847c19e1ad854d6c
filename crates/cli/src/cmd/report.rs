use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use argp::FromArgs;
use runlens_core::{config::Config, models::FailureReport};
use runlens_github::retriever::LogCache;
use runlens_report::{
    enrich::OpenAiSummarizer,
    namespace::NamespaceResolver,
    orchestrator::{ReportGenerator, ReportRequest},
};
use typed_path::Utf8NativePathBuf;

use crate::{
    progress::CliReporter,
    util::{connect, native_path},
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Generate a failure report for a workflow run.
#[argp(subcommand, name = "report")]
pub struct Args {
    #[argp(option)]
    /// workflow run ID
    run: u64,
    #[argp(option)]
    /// repository as owner/name or GitHub URL
    repo: Option<String>,
    #[argp(switch)]
    /// save each failing step's log next to the report
    with_logs: bool,
    #[argp(switch)]
    /// include phase timings in the report
    timings: bool,
    #[argp(option, short = 'o', from_str_fn(native_path))]
    /// output directory
    output: Option<Utf8NativePathBuf>,
    #[argp(switch)]
    /// summarize error contexts with the configured OpenAI model
    ai: bool,
}

pub async fn run(args: Args, config: &Config) -> Result<()> {
    let github = connect(config, args.repo.as_deref()).await?;
    let cache = LogCache::new();
    let resolver = NamespaceResolver::new(&config.namespace)?;
    let request = ReportRequest {
        repo: github.repo.to_string(),
        run_id: args.run,
        include_logs: args.with_logs,
        include_timings: args.timings || config.report.include_timings,
    };
    let generator = ReportGenerator::new(&github, &cache, &CliReporter).with_namespace(&resolver);
    let mut report = if args.ai {
        let openai =
            config.openai.as_ref().context("--ai requires an `openai` section in the config")?;
        generator.generate_with(&request, Some(&OpenAiSummarizer::new(openai))).await?
    } else {
        generator.generate(&request).await?
    };
    print_summary(&report);

    let output_dir = match &args.output {
        Some(path) => PathBuf::from(path.as_str()),
        None => config.report.output_dir.clone(),
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    if args.with_logs {
        let written = write_logs(&mut report, &output_dir.join(format!("run-{}", args.run)))?;
        if !written.is_empty() {
            println!("\nSaving logs:");
            for line in written {
                println!("- {}", line);
            }
        }
    }
    let out_path = output_dir.join(format!("failure-report-{}.json", report.run.id));
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&out_path, json)
        .with_context(|| format!("Failed to write output file '{}'", out_path.display()))?;
    println!("\nReport saved to {}", out_path.display());
    Ok(())
}

fn print_summary(report: &FailureReport) {
    println!("✅ Failure report generated");
    println!("Run: {} ({})", report.run.id, report.run.name.as_deref().unwrap_or("N/A"));
    println!("Total jobs: {}", report.summary.total_jobs);
    println!("Failing jobs: {}", report.summary.failing_jobs);
    if let Some(namespace) = &report.namespace {
        println!("Namespace: {}", namespace);
    }
    if report.jobs.is_empty() {
        println!("\nNo failing jobs with failing steps were found.");
        return;
    }
    println!("\nFailing jobs:");
    for job in &report.jobs {
        println!("- {} (ID: {})", job.name, job.id);
        for step in &job.steps {
            let contexts = step.error_contexts.len();
            println!("    • Step {}: {} ({} contexts)", step.number, step.name, contexts);
        }
    }
}

/// Move raw step logs out of the report into `run-<id>/job-<id>/step-<n>.log` files.
fn write_logs(report: &mut FailureReport, logs_dir: &Path) -> Result<Vec<String>> {
    let mut written = vec![];
    for job in &mut report.jobs {
        let job_dir = logs_dir.join(format!("job-{}", job.id));
        for step in &mut job.steps {
            let Some(log) = step.raw_log.take() else {
                continue;
            };
            std::fs::create_dir_all(&job_dir)
                .with_context(|| format!("Failed to create {}", job_dir.display()))?;
            let path = job_dir.join(format!("step-{}.log", step.number));
            let url = step.log_url.as_deref().unwrap_or("N/A");
            std::fs::write(&path, format!("Log URL: {url}\n\n{log}"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(format!("{} / Step {} → {}", job.name, step.number, path.display()));
        }
    }
    Ok(written)
}
