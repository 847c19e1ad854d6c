use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an alternate config file.
pub const CONFIG_ENV_KEY: &str = "RUNLENS_CONFIG";
/// Environment variable naming an HTTP proxy for GitHub web requests.
pub const PROXY_ENV_KEY: &str = "GH_PROXY_URL";
const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub namespace: NamespaceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub openai: Option<OpenAiConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_web_base")]
    pub web_base: String,
    /// Browser session used for job pages and step logs on the web host.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
            web_base: default_web_base(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub proxy_url: Option<String>,
}

impl SessionConfig {
    /// `name=value` pairs joined for a `Cookie` header, skipping blank entries.
    pub fn cookie_header(&self) -> Option<String> {
        let header = self
            .cookies
            .iter()
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        (!header.is_empty()).then_some(header)
    }
}

fn default_api_base() -> String { "https://api.github.com".to_string() }

fn default_web_base() -> String { "https://github.com".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_repo")]
    pub default_repo: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub include_timings: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            default_repo: default_repo(),
            output_dir: default_output_dir(),
            include_timings: false,
        }
    }
}

fn default_repo() -> String { "matrixorigin/mo-nightly-regression".to_string() }

fn default_output_dir() -> PathBuf { PathBuf::from("reports") }

/// Where the deployment namespace is printed, and how dashboards are linked to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_job_keyword")]
    pub job_keyword: String,
    #[serde(default = "default_step_keyword")]
    pub step_keyword: String,
    /// Workflow whose latest run is inspected when no run ID is given.
    #[serde(default = "default_workflow")]
    pub workflow: String,
    #[serde(default)]
    pub grafana: GrafanaConfig,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            job_keyword: default_job_keyword(),
            step_keyword: default_step_keyword(),
            workflow: default_workflow(),
            grafana: GrafanaConfig::default(),
        }
    }
}

fn default_job_keyword() -> String { "setup mo test env".to_string() }

fn default_step_keyword() -> String { "clean tke env".to_string() }

fn default_workflow() -> String { "branch-nightly-regression-tke-new.yaml".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrafanaConfig {
    #[serde(default = "default_grafana_base")]
    pub base_url: String,
    #[serde(default = "default_grafana_app")]
    pub app: String,
    #[serde(default = "default_grafana_regex")]
    pub regex: String,
}

impl Default for GrafanaConfig {
    fn default() -> Self {
        Self {
            base_url: default_grafana_base(),
            app: default_grafana_app(),
            regex: default_grafana_regex(),
        }
    }
}

fn default_grafana_base() -> String { "https://grafana.ci.matrixorigin.cn/explore".to_string() }

fn default_grafana_app() -> String { "nightly-regression-dis-dn".to_string() }

fn default_grafana_regex() -> String { "(?i)game is on".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self { Self { retries: default_retries(), delay_ms: default_delay_ms() } }
}

fn default_retries() -> u32 { 3 }

fn default_delay_ms() -> u64 { 1000 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub prompt: PromptConfig,
}

fn default_openai_model() -> String { "gpt-4o-mini".to_string() }

/// Placeholder in `user_prompt_template` replaced by the JSON summary input.
pub const SUMMARY_INPUT_PLACEHOLDER: &str = "{{summary_input}}";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You triage CI failures. For every error context you receive, explain the most likely root cause \
in one or two sentences and give it a short issue title. Reply with a JSON object of the form \
{\"contexts\": [{\"contextId\": string, \"shortIssueTitle\": string, \"summary\": string, \
\"details\": string?}], \"overallSummary\": string?, \"additionalNotes\": string?}. \
Only use contextId values from the input.";

const DEFAULT_USER_PROMPT_TEMPLATE: &str =
    "Summarize the failures of this CI run.\n\n{{summary_input}}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    JsonObject,
    Text,
}

/// Prompt sent to the summary model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// User message; `{{summary_input}}` is replaced by the report's contexts as JSON.
    #[serde(default = "default_user_prompt_template")]
    pub user_prompt_template: String,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            user_prompt_template: default_user_prompt_template(),
            temperature: None,
            response_format: ResponseFormat::default(),
        }
    }
}

fn default_system_prompt() -> String { DEFAULT_SYSTEM_PROMPT.to_string() }

fn default_user_prompt_template() -> String { DEFAULT_USER_PROMPT_TEMPLATE.to_string() }

impl Config {
    /// Load the configuration from `path`, falling back to `$RUNLENS_CONFIG` and then
    /// `config.yml`. A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_KEY).map(PathBuf::from));
        let mut config = match &explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        if config.github.token.trim().is_empty()
            && let Ok(token) = std::env::var("GITHUB_TOKEN")
        {
            config.github.token = token;
        }
        config.github.token = config.github.token.trim().to_string();
        let session = &mut config.github.session;
        session.proxy_url = session
            .proxy_url
            .take()
            .or_else(|| std::env::var(PROXY_ENV_KEY).ok())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        config.github.api_base = config.github.api_base.trim_end_matches('/').to_string();
        config.github.web_base = config.github.web_base.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = BufReader::new(
            File::open(path)
                .with_context(|| format!("Failed to open config file {}", path.display()))?,
        );
        serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
