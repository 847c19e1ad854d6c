use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use runlens_core::config::Config;
use runlens_github::{GitHub, api::RepoSlug, retry::RetryPolicy};
use typed_path::Utf8NativePathBuf;

// For argp::FromArgs
pub fn native_path(value: &str) -> Result<Utf8NativePathBuf, String> {
    Ok(Utf8NativePathBuf::from(value))
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

/// Remove terminal color and cursor sequences.
pub fn strip_ansi(text: &str) -> String { ANSI_ESCAPE.replace_all(text, "").into_owned() }

/// Connect to the repository named on the command line, or the configured default.
pub async fn connect(config: &Config, repo: Option<&str>) -> Result<GitHub> {
    let slug = repo.unwrap_or(&config.report.default_repo);
    let repo = RepoSlug::parse(slug).with_context(|| format!("Invalid repository '{}'", slug))?;
    GitHub::new(&config.github, repo, RetryPolicy::from(&config.retry))
        .await
        .context("Failed to create GitHub client")
}
