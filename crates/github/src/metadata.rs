use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use url::Url;

/// Step attributes scraped from a job's rendered page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMetadata {
    pub number: u32,
    pub name: Option<String>,
    pub conclusion: Option<String>,
    pub log_url: Option<String>,
}

static CHECK_STEP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<check-step\b[^>]*>").unwrap());
static ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(data-[a-z-]+)="([^"]*)""#).unwrap());

/// Parse the `<check-step>` elements of a job page. Relative log URLs are resolved against
/// `base`.
pub fn parse_check_steps(html: &str, base: &Url) -> HashMap<u32, StepMetadata> {
    let mut steps = HashMap::new();
    for tag in CHECK_STEP_REGEX.find_iter(html) {
        let mut meta = StepMetadata::default();
        let mut number = None;
        for caps in ATTR_REGEX.captures_iter(tag.as_str()) {
            let value = unescape(&caps[2]);
            match caps[1].to_ascii_lowercase().as_str() {
                "data-number" => number = value.trim().parse::<u32>().ok(),
                "data-name" => meta.name = Some(value),
                "data-conclusion" => meta.conclusion = (!value.is_empty()).then_some(value),
                "data-log-url" if !value.is_empty() => match base.join(&value) {
                    Ok(url) => meta.log_url = Some(url.to_string()),
                    Err(e) => tracing::warn!("Unable to resolve step log URL {}: {}", value, e),
                },
                _ => {}
            }
        }
        let Some(number) = number else {
            continue;
        };
        meta.number = number;
        steps.insert(number, meta);
    }
    steps
}

fn unescape(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
