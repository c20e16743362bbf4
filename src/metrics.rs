use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::agent::StopReason;

/// Summary of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub agent: String,
    pub duration: Duration,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub failures: usize,
    pub stop_reason: Option<StopReason>,
    pub success: bool,
}

impl RunReport {
    pub fn success_rate(reports: &[Self]) -> f32 {
        if reports.is_empty() {
            return 0.0;
        }
        let successes = reports.iter().filter(|r| r.success).count();
        successes as f32 / reports.len() as f32
    }
}

#[derive(Default, Clone)]
pub struct MetricsTracker {
    reports: Arc<Mutex<Vec<RunReport>>>,
}

impl MetricsTracker {
    pub fn start_run(&self, agent: impl Into<String>) -> RunGuard {
        RunGuard {
            agent: agent.into(),
            start: Instant::now(),
            model_calls: 0,
            tool_calls: 0,
            failures: 0,
            metrics: self.clone(),
        }
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

/// Counts calls while a run is in flight. A guard dropped without
/// `finish` records nothing.
pub struct RunGuard {
    agent: String,
    start: Instant,
    model_calls: usize,
    tool_calls: usize,
    failures: usize,
    metrics: MetricsTracker,
}

impl RunGuard {
    pub fn record_model_call(&mut self) {
        self.model_calls += 1;
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// `stop_reason` is `None` when the run ended with an error.
    pub fn finish(self, stop_reason: Option<StopReason>) -> RunReport {
        let report = RunReport {
            agent: self.agent,
            duration: self.start.elapsed(),
            model_calls: self.model_calls,
            tool_calls: self.tool_calls,
            failures: self.failures,
            success: stop_reason == Some(StopReason::FinalAnswer),
            stop_reason,
        };
        if let Ok(mut reports) = self.metrics.reports.lock() {
            reports.push(report.clone());
        }
        report
    }
}
