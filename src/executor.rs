//! Step executor.
//!
//! Runs a step list strictly in order against one page. Each step goes
//! through navigation, readiness, interaction, assertions and capture; a
//! failure in an early stage skips the dependent stages but still attempts
//! the capture in best-effort mode. Nothing here aborts the run: every
//! failure becomes report data.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::time::{self, Instant, sleep};

use crate::browser::Point;
use crate::config::HarnessConfig;
use crate::dom_scripts::{self, DomEvent};
use crate::logging::{
    CATEGORY_ASSERTION, CATEGORY_CAPTURE, CATEGORY_INTERACTION, CATEGORY_NAVIGATE,
    CATEGORY_READINESS, HarnessLogger,
};
use crate::page::{PageError, PageOps};
use crate::report::{
    AssertionOutcome, CaptureReport, InteractionMode, InteractionReport, RunReport, Stage,
    StepOutcome, StepReport,
};
use crate::sink::{self, CaptureSink};
use crate::step::{
    Action, Assertion, Check, ElementLocator, ElementState, Interaction, Navigation,
    ReadinessCondition, Readiness, Step,
};

/// Why a primary interaction could not run.
#[derive(Debug, Error)]
enum InteractionFailure {
    #[error("no element matches {0}")]
    NotFound(String),
    #[error("{locator} is not actionable: {reason}")]
    NotActionable { locator: String, reason: String },
    #[error(transparent)]
    Page(#[from] PageError),
}

impl InteractionFailure {
    fn outcome(&self) -> StepOutcome {
        match self {
            InteractionFailure::NotFound(_) | InteractionFailure::Page(PageError::NotFound(_)) => {
                StepOutcome::InteractionNotFound
            }
            _ => StepOutcome::InteractionFailed,
        }
    }
}

pub struct StepExecutor<'a> {
    config: &'a HarnessConfig,
    logger: &'a HarnessLogger,
    sink: CaptureSink,
}

impl<'a> StepExecutor<'a> {
    pub fn new(config: &'a HarnessConfig, logger: &'a HarnessLogger) -> Self {
        Self {
            config,
            logger,
            sink: CaptureSink::new(config.output_dir.clone()),
        }
    }

    /// Run `steps` and return a finalised report.
    pub async fn run(&mut self, page: &dyn PageOps, plan: &str, steps: &[Step]) -> RunReport {
        let mut report = RunReport::new(plan, self.config.base_url.clone());
        self.run_into(page, steps, &mut report).await;
        report.finalize();
        report
    }

    /// Run `steps`, appending one entry per step to a caller-owned report.
    /// Each call is a fresh run as far as capture paths go. If the future is dropped mid-run the report keeps every finished
    /// step and knows where the current one stopped.
    pub async fn run_into(&mut self, page: &dyn PageOps, steps: &[Step], report: &mut RunReport) {
        self.sink.reset();
        for (index, step) in steps.iter().enumerate() {
            let entry = self.run_step(page, index, step, report).await;
            report.push(entry);
        }
    }

    async fn run_step(
        &mut self,
        page: &dyn PageOps,
        index: usize,
        step: &Step,
        report: &mut RunReport,
    ) -> StepReport {
        let mut entry = StepReport {
            index,
            id: step.id.clone(),
            outcome: StepOutcome::Completed,
            stage: Stage::Navigation,
            url: None,
            readiness_wait_ms: 0,
            interaction: None,
            assertions: Vec::new(),
            capture: None,
            error: None,
        };
        report.mark_stage(index, &step.id, Stage::Navigation, None);

        match self.navigate(page, &step.navigation).await {
            Ok(url) => entry.url = url,
            Err(err) => {
                self.logger.error(
                    format!("step '{}' navigation failed: {err}", step.id),
                    Some(CATEGORY_NAVIGATE),
                    None,
                );
                entry.outcome = StepOutcome::NavigationFailed;
                entry.error = Some(err.to_string());
                self.best_effort_capture(page, step, &mut entry).await;
                return entry;
            }
        }

        entry.stage = Stage::Readiness;
        report.mark_stage(index, &step.id, Stage::Readiness, entry.url.as_deref());
        let started = Instant::now();
        let ready = self.wait_ready(page, &step.readiness).await;
        entry.readiness_wait_ms = elapsed_ms(started);
        if let Err(message) = ready {
            self.logger.error(
                format!("step '{}' not ready: {message}", step.id),
                Some(CATEGORY_READINESS),
                Some(json!({ "waitedMs": entry.readiness_wait_ms })),
            );
            entry.outcome = StepOutcome::ReadinessTimeout;
            entry.error = Some(message);
            self.best_effort_capture(page, step, &mut entry).await;
            return entry;
        }
        self.logger.debug(
            format!("step '{}' ready", step.id),
            Some(CATEGORY_READINESS),
            Some(json!({ "waitedMs": entry.readiness_wait_ms })),
        );

        if let Some(interaction) = &step.interaction {
            entry.stage = Stage::Interaction;
            report.mark_stage(index, &step.id, Stage::Interaction, entry.url.as_deref());
            let (interaction_report, failure) = self.interact(page, interaction).await;
            entry.interaction = Some(interaction_report);
            if let Some(failure) = failure {
                entry.outcome = failure.outcome();
                entry.error = Some(failure.to_string());
                self.best_effort_capture(page, step, &mut entry).await;
                return entry;
            }
        }

        if !step.assertions.is_empty() {
            entry.stage = Stage::Assertions;
            report.mark_stage(index, &step.id, Stage::Assertions, entry.url.as_deref());
            for assertion in &step.assertions {
                let outcome = self.evaluate_assertion(page, assertion).await;
                entry.assertions.push(outcome);
            }
            if entry.failed_assertions() > 0 {
                entry.outcome = StepOutcome::AssertionFailures;
            }
        }

        if let Some(capture) = &step.capture {
            entry.stage = Stage::Capture;
            report.mark_stage(index, &step.id, Stage::Capture, entry.url.as_deref());
            let result = self.sink.capture(page, &capture.target, &capture.path).await;
            let capture_report = self.capture_report(step, &capture.path, result, false);
            if !capture_report.success && entry.outcome == StepOutcome::Completed {
                entry.outcome = StepOutcome::CaptureFailed;
            }
            entry.capture = Some(capture_report);
        }

        entry.stage = Stage::Done;
        entry
    }

    /// Returns the URL navigated to, if the step navigates.
    async fn navigate(
        &self,
        page: &dyn PageOps,
        navigation: &Navigation,
    ) -> Result<Option<String>, PageError> {
        match navigation {
            Navigation::Goto { route } => {
                let url = self.config.resolve_url(route);
                self.logger
                    .info(format!("goto {url}"), Some(CATEGORY_NAVIGATE), None);
                page.goto(&url).await?;
                Ok(Some(url))
            }
            Navigation::InApp { route } => {
                self.logger
                    .info(format!("in-app route {route}"), Some(CATEGORY_NAVIGATE), None);
                page.navigate_in_app(route).await?;
                Ok(Some(route.clone()))
            }
            Navigation::Stay => Ok(None),
        }
    }

    /// Poll the readiness condition until it holds or the bound elapses.
    async fn wait_ready(&self, page: &dyn PageOps, readiness: &Readiness) -> Result<(), String> {
        let timeout = readiness
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.readiness_timeout());

        if let ReadinessCondition::Delay { ms } = readiness.condition {
            sleep(Duration::from_millis(ms)).await;
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut last_error = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match time::timeout(remaining, condition_holds(page, &readiness.condition)).await {
                Ok(Ok(true)) => return Ok(()),
                Ok(Ok(false)) => {}
                Ok(Err(err)) => last_error = Some(err.to_string()),
                Err(_) => last_error = Some("condition check did not return".to_string()),
            }
            let now = Instant::now();
            if now >= deadline {
                let mut message = format!(
                    "{} not satisfied within {} ms",
                    describe_condition(&readiness.condition),
                    timeout.as_millis()
                );
                if let Some(err) = last_error {
                    message.push_str(&format!(" (last error: {err})"));
                }
                return Err(message);
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    async fn interact(
        &self,
        page: &dyn PageOps,
        interaction: &Interaction,
    ) -> (InteractionReport, Option<InteractionFailure>) {
        let mut report = InteractionReport {
            action: interaction.action.name().to_string(),
            mode: None,
            primary_error: None,
            fallback_error: None,
        };

        let failure = match perform(page, &interaction.action, interaction.force).await {
            Ok(mode) => {
                report.mode = Some(mode);
                self.logger.info(
                    format!("{} succeeded", interaction.action.name()),
                    Some(CATEGORY_INTERACTION),
                    Some(json!({ "mode": mode })),
                );
                self.settle(interaction.settle_ms).await;
                return (report, None);
            }
            Err(failure) => failure,
        };

        report.primary_error = Some(failure.to_string());
        self.logger.info(
            format!("{} failed: {failure}", interaction.action.name()),
            Some(CATEGORY_INTERACTION),
            None,
        );

        if let Some(script) = &interaction.fallback_script {
            match page.evaluate(script).await {
                Ok(_) => {
                    report.mode = Some(InteractionMode::Fallback);
                    self.logger.info(
                        "fallback script applied",
                        Some(CATEGORY_INTERACTION),
                        None,
                    );
                    self.settle(interaction.settle_ms).await;
                    return (report, None);
                }
                Err(err) => {
                    self.logger.error(
                        format!("fallback script failed: {err}"),
                        Some(CATEGORY_INTERACTION),
                        None,
                    );
                    report.fallback_error = Some(err.to_string());
                }
            }
        }

        (report, Some(failure))
    }

    async fn settle(&self, ms: u64) {
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn evaluate_assertion(&self, page: &dyn PageOps, assertion: &Assertion) -> AssertionOutcome {
        let outcome = match &assertion.check {
            Check::BoxStable {
                locator,
                perturb,
                tolerance_px,
                settle_ms,
            } => {
                let (pass, message) =
                    match box_shift(page, locator, perturb, Duration::from_millis(*settle_ms)).await
                    {
                        Ok(delta) if delta <= *tolerance_px => {
                            (true, format!("{locator} moved {delta:.2}px"))
                        }
                        Ok(delta) => (
                            false,
                            format!("{locator} moved {delta:.2}px, tolerance {tolerance_px}px"),
                        ),
                        Err(err) => (false, format!("could not evaluate: {err}")),
                    };
                AssertionOutcome {
                    description: assertion.description.clone(),
                    pass,
                    message,
                }
            }
            check => sink::assert(page, &assertion.description, check).await,
        };

        let level_message = format!(
            "{} {}: {}",
            if outcome.pass { "pass" } else { "FAIL" },
            outcome.description,
            outcome.message
        );
        if outcome.pass {
            self.logger
                .info(level_message, Some(CATEGORY_ASSERTION), None);
        } else {
            self.logger
                .error(level_message, Some(CATEGORY_ASSERTION), None);
        }
        outcome
    }

    async fn best_effort_capture(&mut self, page: &dyn PageOps, step: &Step, entry: &mut StepReport) {
        if let Some(capture) = &step.capture {
            let result = self.sink.capture(page, &capture.target, &capture.path).await;
            entry.capture = Some(self.capture_report(step, &capture.path, result, true));
        }
    }

    fn capture_report(
        &self,
        step: &Step,
        requested: &std::path::Path,
        result: Result<PathBuf, sink::CaptureError>,
        best_effort: bool,
    ) -> CaptureReport {
        match result {
            Ok(path) => {
                self.logger.info(
                    format!("captured {}", path.display()),
                    Some(CATEGORY_CAPTURE),
                    Some(json!({ "step": step.id, "bestEffort": best_effort })),
                );
                CaptureReport {
                    path,
                    best_effort,
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                self.logger.error(
                    format!("capture for step '{}' failed: {err}", step.id),
                    Some(CATEGORY_CAPTURE),
                    None,
                );
                CaptureReport {
                    path: self.sink.output_dir().join(requested),
                    best_effort,
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn describe_condition(condition: &ReadinessCondition) -> String {
    match condition {
        ReadinessCondition::Load => "document load".to_string(),
        ReadinessCondition::Selector { locator, state } => {
            format!("{locator} {}", format!("{state:?}").to_lowercase())
        }
        ReadinessCondition::Text { text } => format!("text '{text}' visible"),
        ReadinessCondition::Delay { ms } => format!("delay {ms} ms"),
    }
}

async fn condition_holds(page: &dyn PageOps, condition: &ReadinessCondition) -> Result<bool, PageError> {
    Ok(match condition {
        ReadinessCondition::Load => {
            page.evaluate(dom_scripts::READY_STATE_SCRIPT).await?.as_str() == Some("complete")
        }
        ReadinessCondition::Selector { locator, state } => {
            let probe = page.probe(locator).await?;
            match state {
                ElementState::Visible => probe.found && probe.visible,
                ElementState::Hidden => !probe.found || !probe.visible,
                ElementState::Attached => probe.found,
            }
        }
        ReadinessCondition::Text { text } => {
            page.any_visible(&ElementLocator::text(text.as_str()))
                .await?
        }
        ReadinessCondition::Delay { .. } => true,
    })
}

/// Primary interaction tier: forced DOM dispatch, or native input after
/// the target passes actionability checks.
async fn perform(
    page: &dyn PageOps,
    action: &Action,
    force: bool,
) -> Result<InteractionMode, InteractionFailure> {
    match action {
        Action::Click { locator } | Action::Hover { locator } => {
            let event = if matches!(action, Action::Click { .. }) {
                DomEvent::Click
            } else {
                DomEvent::Hover
            };
            let probe = page.probe(locator).await?;
            if !probe.found {
                return Err(InteractionFailure::NotFound(locator.to_string()));
            }
            if force {
                page.dispatch(locator, event).await?;
                return Ok(InteractionMode::Forced);
            }
            let point = actionable_point(page, locator).await?;
            match event {
                DomEvent::Click => page.mouse_click(point).await?,
                DomEvent::Hover => page.mouse_move(point).await?,
            }
            Ok(InteractionMode::Direct)
        }
        Action::ScrollIntoView { locator } => {
            page.scroll_into_view(locator).await?;
            Ok(InteractionMode::Direct)
        }
        Action::ScrollBy { dx, dy, locator } => {
            let point = match locator {
                Some(locator) => {
                    let probe = page.probe(locator).await?;
                    match probe.bounding_box {
                        Some(bounds) if probe.found => bounds.center(),
                        _ => return Err(InteractionFailure::NotFound(locator.to_string())),
                    }
                }
                None => {
                    let viewport = page.viewport_size().await?;
                    Point {
                        x: f64::from(viewport.width) / 2.0,
                        y: f64::from(viewport.height) / 2.0,
                    }
                }
            };
            page.mouse_wheel(point, *dx, *dy).await?;
            Ok(InteractionMode::Direct)
        }
        Action::ScrollTo { x, y } => {
            page.evaluate(&dom_scripts::scroll_to_script(*x, *y)).await?;
            Ok(InteractionMode::Direct)
        }
        Action::Evaluate { script } => {
            page.evaluate(script).await?;
            Ok(InteractionMode::Direct)
        }
        Action::Press { key, locator } => {
            if let Some(locator) = locator {
                page.focus(locator).await?;
            }
            page.press_key(key).await?;
            Ok(InteractionMode::Direct)
        }
        Action::Resize { viewport } => {
            page.set_viewport(*viewport).await?;
            Ok(InteractionMode::Direct)
        }
    }
}

/// Scroll the target into view and return its centre if nothing covers it.
async fn actionable_point(
    page: &dyn PageOps,
    locator: &ElementLocator,
) -> Result<Point, InteractionFailure> {
    page.scroll_into_view(locator).await?;
    let probe = page.probe(locator).await?;
    if probe.is_actionable() {
        if let Some(bounds) = probe.bounding_box {
            return Ok(bounds.center());
        }
    }
    let reason = if !probe.found {
        return Err(InteractionFailure::NotFound(locator.to_string()));
    } else if !probe.visible {
        "element is not visible"
    } else if !probe.enabled {
        "element is disabled"
    } else if !probe.hit_target {
        "another element intercepts pointer events"
    } else {
        "element has an empty bounding box"
    };
    Err(InteractionFailure::NotActionable {
        locator: locator.to_string(),
        reason: reason.to_string(),
    })
}

/// Observe `locator`, run `perturb`, wait, observe again; return the
/// largest edge movement in document coordinates.
async fn box_shift(
    page: &dyn PageOps,
    locator: &ElementLocator,
    perturb: &Action,
    settle: Duration,
) -> Result<f64, InteractionFailure> {
    let before = page
        .probe(locator)
        .await?
        .document_box()
        .ok_or_else(|| InteractionFailure::NotFound(locator.to_string()))?;
    perform(page, perturb, false).await?;
    sleep(settle).await;
    let after = page
        .probe(locator)
        .await?
        .document_box()
        .ok_or_else(|| InteractionFailure::NotFound(locator.to_string()))?;
    Ok(before.max_delta(&after))
}
