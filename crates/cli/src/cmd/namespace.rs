use anyhow::{Result, bail};
use argp::FromArgs;
use runlens_core::{
    config::Config,
    models::{NamespaceInfo, WorkflowRun},
};
use runlens_github::{
    api::ActionsApi,
    retriever::{LogCache, StepLogRetriever},
};
use runlens_report::namespace::NamespaceResolver;

use crate::util::connect;

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Resolve the deployment namespace of a workflow run.
#[argp(subcommand, name = "namespace")]
pub struct Args {
    #[argp(option)]
    /// workflow run ID (default: latest run of the workflow)
    run: Option<u64>,
    #[argp(option)]
    /// workflow file name or ID to take the latest run of
    workflow: Option<String>,
    #[argp(option)]
    /// repository as owner/name or GitHub URL
    repo: Option<String>,
}

pub async fn run(args: Args, config: &Config) -> Result<()> {
    let github = connect(config, args.repo.as_deref()).await?;
    let cache = LogCache::new();
    let resolver = NamespaceResolver::new(&config.namespace)?;
    let (run, info, workflow) = match args.run {
        Some(run_id) => {
            if args.workflow.is_some() {
                bail!("--run and --workflow cannot be combined");
            }
            let run = github.get_run(run_id).await?;
            let jobs = github.list_jobs(run_id).await?;
            let retriever = StepLogRetriever::new(&github, run_id, &cache);
            (run, resolver.resolve(&jobs, &github, &retriever).await?, None)
        }
        None => {
            let workflow = args.workflow.unwrap_or_else(|| config.namespace.workflow.clone());
            let (run, info) = resolver.resolve_latest(&workflow, &github, &cache).await?;
            (run, info, Some(workflow))
        }
    };
    match info {
        Some(info) => println!("{}", format_namespace(&run, workflow.as_deref(), &info)),
        None => bail!("No environment setup job or cleanup step found in run {}", run.id),
    }
    Ok(())
}

fn field(value: Option<&str>) -> &str { value.unwrap_or("-") }

pub fn format_namespace(run: &WorkflowRun, workflow: Option<&str>, info: &NamespaceInfo) -> String {
    let mut lines = vec!["✅ Namespace extraction succeeded".to_string(), String::new()];
    lines.push("Run:".to_string());
    lines.push(format!("  ID: {}", run.id));
    if let Some(workflow) = workflow {
        lines.push(format!("  Workflow: {workflow}"));
    }
    lines.push(format!("  Name: {}", field(run.name.as_deref())));
    lines.push(format!("  Status: {}", field(run.status.as_deref())));
    lines.push(format!("  Conclusion: {}", field(run.conclusion.as_deref())));
    lines.push(format!("  URL: {}", field(run.html_url.as_deref())));
    lines.push(String::new());
    lines.push("Job:".to_string());
    lines.push(format!("  ID: {}", info.job.id));
    lines.push(format!("  Name: {}", info.job.name));
    lines.push(format!("  Status: {}", field(info.job.status.as_deref())));
    lines.push(format!("  Conclusion: {}", field(info.job.conclusion.as_deref())));
    lines.push(String::new());
    lines.push("Step:".to_string());
    lines.push(format!("  Number: {}", info.step.number));
    lines.push(format!("  Name: {}", info.step.name));
    lines.push(format!("  Status: {}", field(info.step.status.as_deref())));
    lines.push(format!("  Conclusion: {}", field(info.step.conclusion.as_deref())));
    lines.push(String::new());
    match &info.namespace {
        Some(namespace) => lines.push(format!("Namespace: {namespace}")),
        None => lines.push("Namespace: (not found in log)".to_string()),
    }
    if let Some(url) = &info.grafana_url {
        lines.push(format!("Grafana: {url}"));
    }
    lines.join("\n")
}
