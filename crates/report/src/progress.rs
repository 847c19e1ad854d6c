use std::panic::{AssertUnwindSafe, catch_unwind};

use runlens_core::models::LogTier;

/// Identifies one step of one job in progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
    pub job_id: u64,
    pub job_name: String,
    pub step_number: u32,
    pub step_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStart {
        name: String,
        label: String,
    },
    PhaseComplete {
        name: String,
        label: String,
        duration_ms: f64,
        summary: Option<String>,
    },
    PhaseError {
        name: String,
        label: String,
        duration_ms: f64,
        error: String,
    },
    JobStart {
        job_id: u64,
        job_name: String,
        failing_step_count: usize,
    },
    JobComplete {
        job_id: u64,
        job_name: String,
        duration_ms: f64,
        step_count: usize,
    },
    StepStart(StepRef),
    StepComplete {
        step: StepRef,
        duration_ms: f64,
        context_count: usize,
    },
    StepLogFetchStart(StepRef),
    StepLogFetchComplete {
        step: StepRef,
        duration_ms: f64,
        from_cache: bool,
        tier: Option<LogTier>,
        error: Option<String>,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards every event.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

impl<F> ProgressReporter for F
where F: Fn(&ProgressEvent) + Send + Sync
{
    fn report(&self, event: &ProgressEvent) { self(event) }
}

/// Deliver `event`, swallowing any panic raised by the reporter.
pub fn emit(reporter: &dyn ProgressReporter, event: ProgressEvent) {
    if catch_unwind(AssertUnwindSafe(|| reporter.report(&event))).is_err() {
        tracing::warn!("Progress reporter panicked while handling {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Exploding;

    impl ProgressReporter for Exploding {
        fn report(&self, _event: &ProgressEvent) { panic!("reporter exploded") }
    }

    #[test]
    fn test_emit_swallows_panics() {
        emit(&Exploding, ProgressEvent::PhaseStart {
            name: "actions.getRun".to_string(),
            label: "Fetching workflow run".to_string(),
        });
    }

    #[test]
    fn test_emit_delivers_events() {
        let seen = Mutex::new(vec![]);
        let reporter = |event: &ProgressEvent| seen.lock().unwrap().push(event.clone());
        let step = StepRef {
            job_id: 1,
            job_name: "build".to_string(),
            step_number: 3,
            step_name: "Run tests".to_string(),
        };
        emit(&reporter, ProgressEvent::StepStart(step.clone()));
        emit(&NoopReporter, ProgressEvent::StepLogFetchStart(step.clone()));
        assert_eq!(*seen.lock().unwrap(), vec![ProgressEvent::StepStart(step)]);
    }
}
