use anyhow::{Context, Result};
use argp::FromArgs;
use runlens_core::{config::Config, util::size};
use runlens_github::retriever::{LogCache, StepLogRetriever};
use typed_path::Utf8NativePathBuf;

use crate::util::{connect, native_path};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Fetch the log of a single job step.
#[argp(subcommand, name = "step-log")]
pub struct Args {
    #[argp(option)]
    /// workflow run ID
    run: u64,
    #[argp(option)]
    /// job ID
    job: u64,
    #[argp(option)]
    /// step number
    step: u32,
    #[argp(option)]
    /// repository as owner/name or GitHub URL
    repo: Option<String>,
    #[argp(option, short = 'o', from_str_fn(native_path))]
    /// write the log to a file instead of stdout
    output: Option<Utf8NativePathBuf>,
}

pub async fn run(args: Args, config: &Config) -> Result<()> {
    let github = connect(config, args.repo.as_deref()).await?;
    let cache = LogCache::new();
    let retriever = StepLogRetriever::new(&github, args.run, &cache)
        .with_status(|status| eprintln!("{}", status));
    let result = retriever.resolve(args.job, args.step).await?;
    eprintln!(
        "Resolved step {} via {} ({}){}",
        args.step,
        result.tier.as_str(),
        size(result.log.len() as u64),
        result.entry_name.as_deref().map(|n| format!(" from {n}")).unwrap_or_default()
    );
    match &args.output {
        Some(out_path) => std::fs::write(out_path.with_platform_encoding(), &result.log)
            .with_context(|| format!("Failed to write output file '{}'", out_path))?,
        None => print!("{}", result.log),
    }
    Ok(())
}
