//! Reporting of individual harness cases.
//!
//! Every step the harness takes on a test's behalf (creating the stream,
//! loading fixtures, the test body itself, deleting the stream) is a named
//! case with its own outcome, so a failure shows up against the step that
//! caused it.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Prefix of the cases the harness runs itself.
pub const CASE_PREFIX: &str = "[stream-fixture]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    Panicked(String),
}

impl CaseOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, CaseOutcome::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
    pub elapsed: Duration,
}

/// Receives case results.
pub trait CaseReporter: Send + Sync {
    fn case_started(&self, _name: &str) {}

    fn case_finished(&self, report: &CaseReport);
}

/// Logs every case through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl CaseReporter for TracingReporter {
    fn case_started(&self, name: &str) {
        info!(case = %name, "Case started");
    }

    fn case_finished(&self, report: &CaseReport) {
        let elapsed_ms = report.elapsed.as_millis() as u64;
        match &report.outcome {
            CaseOutcome::Passed => info!(case = %report.name, elapsed_ms, "ok"),
            CaseOutcome::Failed(reason) => {
                error!(case = %report.name, elapsed_ms, %reason, "not ok")
            }
            CaseOutcome::Panicked(reason) => {
                error!(case = %report.name, elapsed_ms, %reason, "not ok (panicked)")
            }
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<CaseReport>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CaseReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Case names in the order they finished.
    pub fn names(&self) -> Vec<String> {
        self.reports().into_iter().map(|r| r.name).collect()
    }
}

impl CaseReporter for RecordingReporter {
    fn case_finished(&self, report: &CaseReport) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report.clone());
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        for name in ["first", "second"] {
            reporter.case_finished(&CaseReport {
                name: name.to_string(),
                outcome: CaseOutcome::Passed,
                elapsed: Duration::ZERO,
            });
        }
        assert_eq!(reporter.names(), vec!["first", "second"]);
        assert!(reporter.reports().iter().all(|r| r.outcome.is_passed()));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
