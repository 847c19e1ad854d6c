use anyhow::{Context, Result};
use argp::FromArgs;
use runlens_report::extractor::{ExtractOptions, extract_error_contexts};
use typed_path::Utf8NativePathBuf;

use crate::util::{native_path, strip_ansi};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Extract error contexts from a local step log and print them as JSON.
#[argp(subcommand, name = "extract")]
pub struct Args {
    #[argp(positional, from_str_fn(native_path))]
    /// log file
    file: Utf8NativePathBuf,
    #[argp(option)]
    /// step name, used to detect the test scenario
    step: Option<String>,
    #[argp(option)]
    /// job name, used to detect the test scenario
    job: Option<String>,
    #[argp(switch)]
    /// fall back to the last ##[error] line when nothing matches
    fallback: bool,
    #[argp(switch)]
    /// remove ANSI escape sequences before extracting
    strip_ansi: bool,
}

pub fn run(args: Args) -> Result<()> {
    let data = std::fs::read(args.file.with_platform_encoding())
        .with_context(|| format!("Failed to read {}", args.file))?;
    let mut log = String::from_utf8_lossy(&data).into_owned();
    if args.strip_ansi {
        log = strip_ansi(&log);
    }
    let options = ExtractOptions {
        step_name: args.step.as_deref(),
        job_name: args.job.as_deref(),
        allow_final_error_fallback: args.fallback,
    };
    let contexts = extract_error_contexts(&log, &options);
    tracing::info!("Found {} error contexts in {}", contexts.len(), args.file);
    println!("{}", serde_json::to_string_pretty(&contexts)?);
    Ok(())
}
