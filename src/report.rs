//! Run report: one entry per executed step, built incrementally.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the serialized report inside the output directory.
pub const REPORT_FILE: &str = "report.json";

/// Furthest stage a step reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Navigation,
    Readiness,
    Interaction,
    Assertions,
    Capture,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// Every stage ran but at least one assertion failed.
    AssertionFailures,
    ReadinessTimeout,
    InteractionNotFound,
    InteractionFailed,
    NavigationFailed,
    /// Every other stage succeeded but the capture did not.
    CaptureFailed,
    /// The run was cancelled while this step executed.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    Direct,
    Forced,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionReport {
    pub action: String,
    /// Set when the interaction (primary or fallback) took effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<InteractionMode>,
    /// Why the primary path was abandoned, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub description: String,
    pub pass: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    pub path: PathBuf,
    /// Taken after an earlier stage failed.
    pub best_effort: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub id: String,
    pub outcome: StepOutcome,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub readiness_wait_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction: Option<InteractionReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn failed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| !a.pass).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub plan: String,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the run stopped before every step executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub steps: Vec<StepReport>,
    #[serde(skip)]
    in_flight: Option<InFlight>,
}

/// Step currently executing, kept so a cancelled run can still say where
/// it stopped.
#[derive(Debug, Clone, PartialEq)]
struct InFlight {
    index: usize,
    id: String,
    stage: Stage,
    url: Option<String>,
}

impl RunReport {
    pub fn new(plan: impl Into<String>, base_url: impl Into<String>) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            plan: plan.into(),
            base_url: base_url.into(),
            started_at,
            finished_at: None,
            aborted: None,
            steps: Vec::new(),
            in_flight: None,
        }
    }

    /// Record that step `index` reached `stage`.
    pub fn mark_stage(&mut self, index: usize, id: &str, stage: Stage, url: Option<&str>) {
        self.in_flight = Some(InFlight {
            index,
            id: id.to_string(),
            stage,
            url: url.map(str::to_string),
        });
    }

    pub fn push(&mut self, step: StepReport) {
        self.in_flight = None;
        self.steps.push(step);
    }

    pub fn finalize(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Stop the run. A step that was executing is recorded as interrupted
    /// at the stage it reached.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(step) = self.in_flight.take() {
            self.steps.push(StepReport {
                index: step.index,
                id: step.id,
                outcome: StepOutcome::Interrupted,
                stage: step.stage,
                url: step.url,
                readiness_wait_ms: 0,
                interaction: None,
                assertions: Vec::new(),
                capture: None,
                error: Some(reason.clone()),
            });
        }
        self.aborted = Some(reason);
        self.finalize();
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            steps: self.steps.len(),
            ..Summary::default()
        };
        for step in &self.steps {
            match step.outcome {
                StepOutcome::Completed => summary.completed += 1,
                StepOutcome::AssertionFailures => {}
                StepOutcome::ReadinessTimeout => summary.readiness_timeouts += 1,
                StepOutcome::InteractionNotFound | StepOutcome::InteractionFailed => {
                    summary.interaction_failures += 1
                }
                StepOutcome::NavigationFailed => summary.navigation_failures += 1,
                StepOutcome::CaptureFailed | StepOutcome::Interrupted => {}
            }
            summary.assertions_passed += step.assertions.len() - step.failed_assertions();
            summary.assertions_failed += step.failed_assertions();
            if let Some(capture) = &step.capture {
                if capture.success {
                    summary.captures += 1;
                } else {
                    summary.capture_failures += 1;
                }
            }
        }
        summary
    }

    /// Serialize to `report.json` under `dir`, creating it if needed.
    pub async fn write_json(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(REPORT_FILE);
        let body = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    /// Human-readable multi-line summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "plan {} ({})", self.plan, self.base_url);
        for step in &self.steps {
            let _ = writeln!(
                out,
                "  [{}] {:<28} {:?} (stage {:?}, ready in {} ms)",
                step.index, step.id, step.outcome, step.stage, step.readiness_wait_ms
            );
            if let Some(interaction) = &step.interaction {
                let mode = interaction
                    .mode
                    .map(|m| format!("{m:?}").to_lowercase())
                    .unwrap_or_else(|| "none".into());
                let _ = writeln!(out, "      interaction {} via {mode}", interaction.action);
            }
            for assertion in &step.assertions {
                let mark = if assertion.pass { "ok  " } else { "FAIL" };
                let _ = writeln!(
                    out,
                    "      {mark} {}: {}",
                    assertion.description, assertion.message
                );
            }
            if let Some(capture) = &step.capture {
                let label = match (capture.success, capture.best_effort) {
                    (true, false) => "captured",
                    (true, true) => "captured (best effort)",
                    (false, _) => "capture failed",
                };
                let _ = write!(out, "      {label} {}", capture.path.display());
                if let Some(err) = &capture.error {
                    let _ = write!(out, ": {err}");
                }
                out.push('\n');
            }
            if let Some(err) = &step.error {
                let _ = writeln!(out, "      error: {err}");
            }
        }
        let summary = self.summary();
        let _ = writeln!(
            out,
            "{}/{} steps completed, {} assertions passed, {} failed, {} captures",
            summary.completed,
            summary.steps,
            summary.assertions_passed,
            summary.assertions_failed,
            summary.captures
        );
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "run aborted: {reason}");
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Summary {
    pub steps: usize,
    pub completed: usize,
    pub readiness_timeouts: usize,
    pub interaction_failures: usize,
    pub navigation_failures: usize,
    pub assertions_passed: usize,
    pub assertions_failed: usize,
    pub captures: usize,
    pub capture_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, outcome: StepOutcome) -> StepReport {
        StepReport {
            index,
            id: format!("step-{index}"),
            outcome,
            stage: Stage::Done,
            url: None,
            readiness_wait_ms: 0,
            interaction: None,
            assertions: Vec::new(),
            capture: None,
            error: None,
        }
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut report = RunReport::new("home-theme", "http://localhost:5173");
        let mut ok = entry(0, StepOutcome::Completed);
        ok.capture = Some(CaptureReport {
            path: "a.png".into(),
            best_effort: false,
            success: true,
            error: None,
        });
        report.push(ok);

        let mut failed = entry(1, StepOutcome::AssertionFailures);
        failed.assertions = vec![
            AssertionOutcome {
                description: "first".into(),
                pass: false,
                message: "expected hidden".into(),
            },
            AssertionOutcome {
                description: "second".into(),
                pass: true,
                message: "ok".into(),
            },
        ];
        report.push(failed);

        let mut timeout = entry(2, StepOutcome::ReadinessTimeout);
        timeout.capture = Some(CaptureReport {
            path: "b.png".into(),
            best_effort: true,
            success: false,
            error: Some("boom".into()),
        });
        report.push(timeout);

        let summary = report.summary();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.readiness_timeouts, 1);
        assert_eq!(summary.assertions_passed, 1);
        assert_eq!(summary.assertions_failed, 1);
        assert_eq!(summary.captures, 1);
        assert_eq!(summary.capture_failures, 1);

        let text = report.render_text();
        assert!(text.contains("FAIL first: expected hidden"));
        assert!(text.contains("capture failed b.png: boom"));
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let value = serde_json::to_value(entry(0, StepOutcome::InteractionNotFound)).unwrap();
        assert_eq!(value["outcome"], "interaction_not_found");
        assert_eq!(value["stage"], "done");
        assert!(value.get("capture").is_none());
    }

    #[test]
    fn finalize_keeps_first_timestamp() {
        let mut report = RunReport::new("p", "http://x");
        report.finalize();
        let first = report.finished_at;
        report.abort("run timed out");
        assert_eq!(report.finished_at, first);
        assert_eq!(report.aborted.as_deref(), Some("run timed out"));
    }

    #[test]
    fn abort_records_in_flight_step() {
        let mut report = RunReport::new("p", "http://x");
        report.push(entry(0, StepOutcome::Completed));
        report.mark_stage(1, "slow", Stage::Readiness, Some("http://x/slow"));
        report.abort("run timed out after 100 ms");

        assert_eq!(report.steps.len(), 2);
        let last = &report.steps[1];
        assert_eq!(last.id, "slow");
        assert_eq!(last.outcome, StepOutcome::Interrupted);
        assert_eq!(last.stage, Stage::Readiness);
        assert_eq!(last.url.as_deref(), Some("http://x/slow"));
        assert!(report.is_finalized());
    }

    #[tokio::test]
    async fn write_json_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out");
        let mut report = RunReport::new("p", "http://x");
        report.push(entry(0, StepOutcome::Completed));
        report.finalize();

        let path = report.write_json(&target).await.unwrap();
        assert_eq!(path, target.join(REPORT_FILE));
        let parsed: RunReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, report);
    }
}
