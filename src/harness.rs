//! Run orchestration: validate, preflight, open a session, execute under
//! the run-level timeout, release the session, write the report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::browser::BrowserRuntime;
use crate::config::HarnessConfig;
use crate::executor::StepExecutor;
use crate::logging::{CATEGORY_RUN, HarnessLogger};
use crate::report::{REPORT_FILE, RunReport};
use crate::session::{LaunchError, SessionController};
use crate::sink::validate_plan;
use crate::step::{PlanError, VerificationPlan};

/// Bound on the base-URL reachability probe.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fatal run errors. Everything else ends up in the report.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("base URL {url} is unreachable")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("run exceeded {after_ms} ms; {} step(s) recorded", report.steps.len())]
    Timeout {
        after_ms: u64,
        report: Box<RunReport>,
    },
    #[error("failed to write {}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// The partial report, when the run got far enough to produce one.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::Timeout { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

/// Apply a plan's own viewport, color scheme and local-state overrides on
/// top of the environment configuration.
pub fn effective_config(plan: &VerificationPlan, config: &HarnessConfig) -> HarnessConfig {
    let mut merged = config.clone();
    if let Some(viewport) = plan.viewport {
        merged.viewport = Some(viewport);
    }
    if let Some(scheme) = plan.color_scheme {
        merged.color_scheme = scheme;
    }
    merged.local_storage.extend(
        plan.local_storage
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    merged
}

/// Any HTTP response counts as reachable; only transport failures do not.
pub async fn preflight(base_url: &str) -> Result<(), RunError> {
    let unreachable = |source| RunError::Unreachable {
        url: base_url.to_string(),
        source,
    };
    let client = reqwest::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()
        .map_err(unreachable)?;
    client.get(base_url).send().await.map_err(unreachable)?;
    Ok(())
}

/// Execute one plan end to end.
///
/// Returns the report when every step ran, regardless of assertion
/// outcomes. The session is released exactly once on every path after a
/// successful launch, including the run-level timeout.
pub async fn run_plan<R: BrowserRuntime>(
    runtime: Arc<R>,
    plan: &VerificationPlan,
    config: &HarnessConfig,
    logger: &HarnessLogger,
) -> Result<RunReport, RunError> {
    let config = effective_config(plan, config);
    validate_plan(plan)?;

    if config.preflight && !plan.uses_only_absolute_urls() {
        logger.debug(
            format!("probing {}", config.base_url),
            Some(CATEGORY_RUN),
            None,
        );
        preflight(&config.base_url).await?;
    }

    logger.info(
        format!("running plan '{}'", plan.name),
        Some(CATEGORY_RUN),
        Some(json!({
            "steps": plan.steps.len(),
            "baseUrl": config.base_url,
            "outputDir": config.output_dir.display().to_string(),
        })),
    );

    let session = SessionController::open(runtime, &config, logger).await?;

    let mut report = RunReport::new(plan.name.as_str(), config.base_url.as_str());
    let timed_out = {
        let page = session.active_page();
        let mut executor = StepExecutor::new(&config, logger);
        tokio::time::timeout(
            config.run_timeout(),
            executor.run_into(&page, &plan.steps, &mut report),
        )
        .await
        .is_err()
    };

    if let Err(err) = session.close(logger).await {
        logger.error(
            format!("browser shutdown reported an error: {err}"),
            Some(CATEGORY_RUN),
            None,
        );
    }

    if timed_out {
        report.abort(format!("run timed out after {} ms", config.run_timeout_ms));
        logger.error(
            format!(
                "plan '{}' timed out after {} of {} step(s)",
                plan.name,
                report.steps.len(),
                plan.steps.len()
            ),
            Some(CATEGORY_RUN),
            None,
        );
    } else {
        report.finalize();
    }

    let written = report
        .write_json(&config.output_dir)
        .await
        .map_err(|source| RunError::Report {
            path: config.output_dir.join(REPORT_FILE),
            source,
        })?;
    logger.info(
        format!("report written to {}", written.display()),
        Some(CATEGORY_RUN),
        Some(json!(report.summary())),
    );

    if timed_out {
        return Err(RunError::Timeout {
            after_ms: config.run_timeout_ms,
            report: Box::new(report),
        });
    }
    Ok(report)
}
