use url::Url;

pub trait UrlExt {
    fn query_param(&self, key: &str, value: Option<&str>) -> Url;
}

impl UrlExt for Url {
    #[inline]
    fn query_param(&self, key: &str, value: Option<&str>) -> Url {
        let mut out = self.clone();
        let mut pairs = out.query_pairs_mut();
        pairs.clear();
        let mut updated = false;
        for (k, v) in self.query_pairs() {
            if k == key {
                if let Some(value) = value {
                    if value.is_empty() {
                        pairs.append_key_only(&k);
                    } else {
                        pairs.append_pair(&k, value);
                    }
                }
                updated = true;
            } else if v.is_empty() {
                pairs.append_key_only(&k);
            } else {
                pairs.append_pair(&k, &v);
            }
        }
        if !updated && let Some(value) = value {
            pairs.append_pair(key, value);
        }
        drop(pairs);
        if out.query() == Some("") {
            out.set_query(None);
        }
        out
    }
}

/// Deep link to one step of a job page, e.g. `.../job/42?check_suite_focus=true#step:3:1`.
pub fn step_url(job_html_url: &str, step_number: u32) -> Option<String> {
    let mut url = Url::parse(job_html_url).ok()?.query_param("check_suite_focus", Some("true"));
    url.set_fragment(Some(&format!("step:{step_number}:1")));
    Some(url.to_string())
}

/// Lowercase and strip everything but ASCII letters and digits.
pub fn normalize_alnum(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase()).collect()
}

/// Lowercase, collapsing runs of non-alphanumerics into a single `-`.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Format a size in bytes to a human-readable string.
/// Uses SI (kilo = 1000) units, formatted to two decimal places.
pub fn size(value: u64) -> String {
    let units = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let mut value = value as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < units.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}
