use runlens_report::progress::{ProgressEvent, ProgressReporter, StepRef};

/// Prints one line per progress event to stdout.
pub struct CliReporter;

impl ProgressReporter for CliReporter {
    fn report(&self, event: &ProgressEvent) {
        if let Some(line) = format_event(event) {
            println!("{}", line);
        }
    }
}

fn format_duration(duration_ms: f64) -> String {
    if duration_ms < 1000.0 {
        format!(" {:.0}ms", duration_ms)
    } else {
        format!(" {:.2}s", duration_ms / 1000.0)
    }
}

fn job_label(job_id: u64, job_name: &str) -> String {
    if job_name.is_empty() { format!("job {job_id}") } else { job_name.to_string() }
}

fn step_job(step: &StepRef) -> String { job_label(step.job_id, &step.job_name) }

pub fn format_event(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::PhaseStart { label, .. } => format!("→ {label}..."),
        ProgressEvent::PhaseComplete { label, duration_ms, summary, .. } => {
            let summary = summary.as_deref().map(|s| format!(" {s}")).unwrap_or_default();
            format!("✓ {label}{}{summary}", format_duration(*duration_ms))
        }
        ProgressEvent::PhaseError { label, error, .. } => format!("✖ {label} ({error})"),
        ProgressEvent::JobStart { job_id, job_name, failing_step_count } => format!(
            "• Processing job \"{}\" ({failing_step_count} failing steps)",
            job_label(*job_id, job_name)
        ),
        ProgressEvent::JobComplete { job_id, job_name, duration_ms, step_count } => format!(
            "✓ Job \"{}\" done{}, processed {step_count} steps",
            job_label(*job_id, job_name),
            format_duration(*duration_ms)
        ),
        ProgressEvent::StepStart(step) => {
            format!("  → [{}] Step {}: {}", step_job(step), step.step_number, step.step_name)
        }
        ProgressEvent::StepComplete { step, duration_ms, context_count } => format!(
            "  ✓ [{}] Step {} complete{}, contexts: {context_count}",
            step_job(step),
            step.step_number,
            format_duration(*duration_ms)
        ),
        ProgressEvent::StepLogFetchStart(step) => {
            let name =
                if step.step_name.is_empty() { String::new() } else { format!(" ({})", step.step_name) };
            format!("    ⇢ [{}] Fetching log for step {}{name}", step_job(step), step.step_number)
        }
        ProgressEvent::StepLogFetchComplete { step, duration_ms, from_cache, tier, error } => {
            let base = format!("[{}] Step {} log", step_job(step), step.step_number);
            if let Some(error) = error {
                format!("    ✖ {base} failed: {error}")
            } else {
                let source = if *from_cache { "cache" } else { "download" };
                let tier = tier.map(|t| format!(", {}", t.as_str())).unwrap_or_default();
                format!("    ↳ {base} ({source}{tier}){}", format_duration(*duration_ms))
            }
        }
    };
    match event {
        ProgressEvent::PhaseStart { label, .. } | ProgressEvent::PhaseComplete { label, .. }
            if label.is_empty() =>
        {
            None
        }
        _ => Some(line),
    }
}

#[cfg(test)]
mod tests {
    use runlens_core::models::LogTier;

    use super::*;

    fn step() -> StepRef {
        StepRef {
            job_id: 42,
            job_name: String::new(),
            step_number: 3,
            step_name: "Run tests".to_string(),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12.4), " 12ms");
        assert_eq!(format_duration(1534.0), " 1.53s");
    }

    #[test]
    fn test_format_events() {
        let cases = [
            (
                ProgressEvent::PhaseComplete {
                    name: "actions.listJobs".to_string(),
                    label: "Listing workflow jobs".to_string(),
                    duration_ms: 250.0,
                    summary: Some("12 jobs".to_string()),
                },
                "✓ Listing workflow jobs 250ms 12 jobs",
            ),
            (
                ProgressEvent::PhaseError {
                    name: "actions.getRun".to_string(),
                    label: "Fetching workflow run".to_string(),
                    duration_ms: 3.0,
                    error: "Not Found".to_string(),
                },
                "✖ Fetching workflow run (Not Found)",
            ),
            (ProgressEvent::StepStart(step()), "  → [job 42] Step 3: Run tests"),
            (
                ProgressEvent::StepLogFetchComplete {
                    step: step(),
                    duration_ms: 2500.0,
                    from_cache: false,
                    tier: Some(LogTier::Archive),
                    error: None,
                },
                "    ↳ [job 42] Step 3 log (download, archive) 2.50s",
            ),
            (
                ProgressEvent::JobStart {
                    job_id: 42,
                    job_name: "build".to_string(),
                    failing_step_count: 2,
                },
                "• Processing job \"build\" (2 failing steps)",
            ),
        ];
        for (event, expected) in cases {
            assert_eq!(format_event(&event).as_deref(), Some(expected));
        }
        let unlabeled =
            ProgressEvent::PhaseStart { name: "x".to_string(), label: String::new() };
        assert_eq!(format_event(&unlabeled), None);
    }
}
