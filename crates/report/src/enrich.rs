use std::{collections::HashMap, future::Future};

use anyhow::{Context, Result, bail};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use runlens_core::{
    config::{self, OpenAiConfig, PromptConfig, SUMMARY_INPUT_PLACEHOLDER},
    models::FailureReport,
};
use serde::Deserialize;
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Adds derived data to a finished report.
pub trait Enricher: Send + Sync {
    fn enrich(&self, report: &mut FailureReport) -> impl Future<Output = Result<()>> + Send;
}

pub fn context_id(job_id: u64, step_number: u32, index: usize) -> String {
    format!("job-{job_id}-step-{step_number}-context-{index}")
}

/// The prompt payload: run metadata plus every error context with a stable id.
pub fn prompt_input(report: &FailureReport) -> Value {
    let mut contexts = vec![];
    for job in &report.jobs {
        for step in &job.steps {
            for (index, ctx) in step.error_contexts.iter().enumerate() {
                contexts.push(json!({
                    "contextId": context_id(job.id, step.number, index),
                    "job": {"id": job.id, "name": job.name, "conclusion": job.conclusion},
                    "step": {"number": step.number, "name": step.name, "conclusion": step.conclusion},
                    "snippet": ctx.snippet,
                    "grafanaUrl": ctx.grafana_url,
                }));
            }
        }
    }
    json!({
        "run": {
            "id": report.run.id,
            "name": report.run.name,
            "conclusion": report.run.conclusion,
            "createdAt": report.run.created_at,
            "updatedAt": report.run.updated_at,
        },
        "summary": report.summary,
        "contexts": contexts,
    })
}

/// The user message: `template` with the placeholder replaced by the pretty-printed input.
pub fn user_prompt(template: &str, input: &Value) -> Result<String> {
    Ok(template.replace(SUMMARY_INPUT_PLACEHOLDER, &serde_json::to_string_pretty(input)?))
}

fn check_prompt(prompt: &PromptConfig) -> Result<()> {
    if prompt.system_prompt.trim().is_empty() {
        bail!("Summary prompt config is missing systemPrompt.");
    }
    if prompt.user_prompt_template.trim().is_empty() {
        bail!("Summary prompt config is missing userPromptTemplate.");
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    #[serde(default)]
    pub contexts: Vec<ContextSummary>,
    #[serde(default)]
    pub overall_summary: Option<String>,
    #[serde(default)]
    pub additional_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub context_id: String,
    pub summary: String,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub short_issue_title: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a model reply, tolerating a Markdown code fence around the JSON.
pub fn parse_response(text: &str) -> Result<SummaryResponse> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_prefix("json").unwrap_or(rest);
        body = body.trim_end().strip_suffix("```").unwrap_or(body);
    }
    serde_json::from_str(body.trim()).context("Model reply is not valid summary JSON")
}

/// Write the summaries into the matching contexts and record the overall result.
pub fn apply_summaries(
    report: &mut FailureReport,
    response: SummaryResponse,
    model: &str,
    generated_at: &str,
) {
    let mut summaries: HashMap<String, ContextSummary> =
        response.contexts.into_iter().map(|c| (c.context_id.clone(), c)).collect();
    for job in &mut report.jobs {
        for step in &mut job.steps {
            for (index, ctx) in step.error_contexts.iter_mut().enumerate() {
                let id = context_id(job.id, step.number, index);
                let Some(entry) = summaries.remove(&id) else {
                    continue;
                };
                let mut summary = json!({
                    "summary": entry.summary.trim(),
                    "model": model,
                    "generatedAt": generated_at,
                    "contextId": id,
                });
                if let Some(details) = entry.details.filter(|d| !d.is_null()) {
                    summary["details"] = details;
                }
                if let Some(title) = trimmed(entry.short_issue_title) {
                    summary["shortIssueTitle"] = title.into();
                }
                ctx.ai_summary = Some(summary);
            }
        }
    }
    if !summaries.is_empty() {
        tracing::warn!("Model returned {} summaries for unknown contexts", summaries.len());
    }
    let mut overall = json!({
        "status": "ok",
        "model": model,
        "generatedAt": generated_at,
        "overallSummary": response.overall_summary.map(|s| s.trim().to_string()),
    });
    if let Some(notes) = trimmed(response.additional_notes) {
        overall["additionalNotes"] = notes.into();
    }
    report.ai_summary = Some(overall);
}

/// Summarizes error contexts with an OpenAI-compatible chat model.
pub struct OpenAiSummarizer {
    client: Client<OpenAIConfig>,
    model: String,
    prompt: PromptConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: &OpenAiConfig) -> Self {
        let mut openai = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(base_url) = &config.base_url {
            openai = openai.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(openai),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
        }
    }
}

impl Enricher for OpenAiSummarizer {
    async fn enrich(&self, report: &mut FailureReport) -> Result<()> {
        if report.contexts().next().is_none() {
            tracing::info!("No error contexts found, skipping AI summaries");
            return Ok(());
        }
        check_prompt(&self.prompt)?;
        let input = user_prompt(&self.prompt.user_prompt_template, &prompt_input(report))?;
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.prompt.system_prompt.as_str())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default().content(input).build()?.into(),
        ];
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(messages).response_format(
            match self.prompt.response_format {
                config::ResponseFormat::JsonObject => ResponseFormat::JsonObject,
                config::ResponseFormat::Text => ResponseFormat::Text,
            },
        );
        if let Some(temperature) = self.prompt.temperature {
            request.temperature(temperature);
        }
        let request = request.build()?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("Chat completion with {} failed", self.model))?;
        let content = response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .context("Model returned no content")?;
        let parsed = parse_response(&content)?;
        let generated_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        tracing::info!("Received {} context summaries from {}", parsed.contexts.len(), self.model);
        apply_summaries(report, parsed, &self.model, &generated_at);
        Ok(())
    }
}
