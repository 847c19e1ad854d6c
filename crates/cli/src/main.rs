mod cmd {
    pub mod extract;
    pub mod namespace;
    pub mod report;
    pub mod step_log;
}
mod progress;
mod util;

use std::path::PathBuf;

use anyhow::Result;
use argp::FromArgs;
use runlens_core::config::Config;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};
use typed_path::Utf8NativePathBuf;

use crate::util::native_path;

#[derive(FromArgs, PartialEq, Debug)]
/// Summarize the failed steps of GitHub Actions workflow runs.
struct TopLevel {
    #[argp(subcommand)]
    command: SubCommand,
    #[argp(option, short = 'c', from_str_fn(native_path))]
    /// config file (default: $RUNLENS_CONFIG, then config.yml)
    config: Option<Utf8NativePathBuf>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Report(cmd::report::Args),
    Extract(cmd::extract::Args),
    StepLog(cmd::step_log::Args),
    Namespace(cmd::namespace::Args),
}

async fn run(args: TopLevel) -> Result<()> {
    let config_path = args.config.as_ref().map(|p| PathBuf::from(p.as_str()));
    let load_config = || Config::load(config_path.as_deref());
    match args.command {
        SubCommand::Report(args) => cmd::report::run(args, &load_config()?).await,
        SubCommand::Extract(args) => cmd::extract::run(args),
        SubCommand::StepLog(args) => cmd::step_log::run(args, &load_config()?).await,
        SubCommand::Namespace(args) => cmd::namespace::run(args, &load_config()?).await,
    }
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(env_filter),
        )
        .init();

    let args: TopLevel = argp::parse_args_or_exit(argp::DEFAULT);
    if let Err(e) = run(args).await {
        tracing::error!("{:?}", e);
        std::process::exit(1);
    }
}
