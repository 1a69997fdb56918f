//! Capture and assertion sink.
//!
//! Screenshots land under the output directory at paths the plan declares;
//! assertions are evaluated against live page state and folded into an
//! [`AssertionOutcome`]. Neither operation raises for an absent element: a
//! missing capture target is a typed [`CaptureError`] and a missing
//! assertion subject is a failed outcome.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::browser::ScreenshotRequest;
use crate::page::{PageError, PageOps};
use crate::report::AssertionOutcome;
use crate::step::{CaptureTarget, Check, ElementLocator, PlanError, VerificationPlan};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture target {0} not found")]
    NotFound(String),
    #[error("capture target {0} has an empty bounding box")]
    EmptyTarget(String),
    #[error("capture path {} already written in this run", .0.display())]
    DuplicatePath(PathBuf),
    #[error("capture path {} escapes the output directory", .0.display())]
    InvalidPath(PathBuf),
    #[error("screenshot failed: {0}")]
    Page(#[from] PageError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Normalise a capture path relative to the output directory. Absolute
/// paths and paths climbing above the directory are rejected.
pub fn normalize_capture_path(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Reject plans that would overwrite captures or cannot be reported
/// unambiguously. Runs before any browser is launched.
pub fn validate_plan(plan: &VerificationPlan) -> Result<(), PlanError> {
    let mut ids = HashSet::new();
    let mut captures: HashMap<PathBuf, &str> = HashMap::new();

    for (index, step) in plan.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(PlanError::EmptyStepId { index });
        }
        if !ids.insert(step.id.as_str()) {
            return Err(PlanError::DuplicateStepId {
                id: step.id.clone(),
            });
        }
        if let Some(capture) = &step.capture {
            let normalized = normalize_capture_path(&capture.path).ok_or_else(|| {
                PlanError::InvalidCapturePath {
                    path: capture.path.clone(),
                    step: step.id.clone(),
                }
            })?;
            if let Some(first) = captures.get(&normalized) {
                return Err(PlanError::DuplicateCapturePath {
                    path: normalized,
                    first: first.to_string(),
                    second: step.id.clone(),
                });
            }
            captures.insert(normalized, step.id.as_str());
        }
    }
    Ok(())
}

/// Writes screenshots for one run and refuses to overwrite its own output.
#[derive(Debug)]
pub struct CaptureSink {
    output_dir: PathBuf,
    written: HashSet<PathBuf>,
}

impl CaptureSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            written: HashSet::new(),
        }
    }

    /// Forget earlier captures so the next run may reuse the same paths.
    pub fn reset(&mut self) {
        self.written.clear();
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Take a screenshot of `target` and write it to `path` (relative to the
    /// output directory). Returns the written file's path.
    pub async fn capture(
        &mut self,
        page: &dyn PageOps,
        target: &CaptureTarget,
        path: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let relative =
            normalize_capture_path(path).ok_or_else(|| CaptureError::InvalidPath(path.to_path_buf()))?;
        if self.written.contains(&relative) {
            return Err(CaptureError::DuplicatePath(relative));
        }

        let request = match target {
            CaptureTarget::FullPage => ScreenshotRequest {
                full_page: true,
                clip: None,
            },
            CaptureTarget::Viewport => ScreenshotRequest::default(),
            CaptureTarget::Element { locator } => element_request(page, locator).await?,
        };

        let bytes = page.screenshot(&request).await?;
        let destination = self.output_dir.join(&relative);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CaptureError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&destination, bytes)
            .await
            .map_err(|source| CaptureError::Io {
                path: destination.clone(),
                source,
            })?;

        self.written.insert(relative);
        Ok(destination)
    }
}

async fn element_request(
    page: &dyn PageOps,
    locator: &ElementLocator,
) -> Result<ScreenshotRequest, CaptureError> {
    match page.scroll_into_view(locator).await {
        Ok(()) => {}
        Err(PageError::NotFound(target)) => return Err(CaptureError::NotFound(target)),
        Err(err) => return Err(err.into()),
    }
    let probe = page.probe(locator).await?;
    if !probe.found {
        return Err(CaptureError::NotFound(locator.to_string()));
    }
    match probe.document_box() {
        Some(clip) if !clip.is_empty() => Ok(ScreenshotRequest {
            full_page: false,
            clip: Some(clip),
        }),
        _ => Err(CaptureError::EmptyTarget(locator.to_string())),
    }
}

/// Evaluate a state predicate. `BoxStable` needs an interaction between two
/// observations and is handled by the executor; here it only reports that.
pub async fn assert(page: &dyn PageOps, description: &str, check: &Check) -> AssertionOutcome {
    let result = evaluate_check(page, check).await;
    let (pass, message) = match result {
        Ok(verdict) => verdict,
        Err(err) => (false, format!("could not evaluate: {err}")),
    };
    AssertionOutcome {
        description: description.to_string(),
        pass,
        message,
    }
}

async fn evaluate_check(page: &dyn PageOps, check: &Check) -> Result<(bool, String), PageError> {
    Ok(match check {
        Check::Visible { locator } => {
            let probe = page.probe(locator).await?;
            if !probe.found {
                (false, format!("{locator} matched {} element(s)", probe.count))
            } else if probe.visible {
                (true, format!("{locator} is visible"))
            } else {
                (false, format!("{locator} is present but hidden"))
            }
        }
        Check::NotVisible { locator } => {
            let probe = page.probe(locator).await?;
            if probe.found && probe.visible {
                (false, format!("{locator} is visible"))
            } else {
                (true, format!("{locator} is not visible"))
            }
        }
        Check::TextPresent { text } => {
            if page.any_visible(&ElementLocator::text(text.as_str())).await? {
                (true, format!("text '{text}' is visible"))
            } else {
                (false, format!("text '{text}' not found"))
            }
        }
        Check::AltTextPresent { text } => {
            let probe = page.probe(&ElementLocator::alt(text.as_str())).await?;
            if probe.count > 0 {
                (true, format!("{} image(s) with alt text '{text}'", probe.count))
            } else {
                (false, format!("no image with alt text '{text}'"))
            }
        }
        Check::StyleEquals {
            locator,
            property,
            expected,
        } => match page.computed_style(locator, property).await? {
            None => (false, format!("{locator} not found")),
            Some(actual) if actual == expected.trim() => {
                (true, format!("{property} is '{actual}'"))
            }
            Some(actual) => (
                false,
                format!("{property} is '{actual}', expected '{expected}'"),
            ),
        },
        Check::ScriptEquals {
            expression,
            expected,
        } => {
            let actual = page.evaluate(expression).await?;
            if json_matches(&actual, expected) {
                (true, format!("{expression} == {actual}"))
            } else {
                (false, format!("{expression} == {actual}, expected {expected}"))
            }
        }
        Check::BoxStable { .. } => (
            false,
            "box stability requires an interaction and cannot be checked statically".to_string(),
        ),
    })
}

/// Numbers compare by value so `1` and `1.0` agree.
fn json_matches(actual: &JsonValue, expected: &JsonValue) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => actual == expected,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::tests::FakePage;
    use crate::step::Step;

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(
            normalize_capture_path(Path::new("./shots/../a.png")),
            Some(PathBuf::from("a.png"))
        );
        assert_eq!(
            normalize_capture_path(Path::new("dark/home.png")),
            Some(PathBuf::from("dark/home.png"))
        );
        assert_eq!(normalize_capture_path(Path::new("../a.png")), None);
        assert_eq!(normalize_capture_path(Path::new("/tmp/a.png")), None);
        assert_eq!(normalize_capture_path(Path::new(".")), None);
    }

    #[test]
    fn duplicate_capture_paths_are_detected_after_normalisation() {
        let plan = VerificationPlan::new("p", "")
            .step(Step::new("one").goto("/").capture_full_page("a.png"))
            .step(Step::new("two").goto("/x").capture_full_page("./sub/../a.png"));
        match validate_plan(&plan) {
            Err(PlanError::DuplicateCapturePath {
                path,
                first,
                second,
            }) => {
                assert_eq!(path, PathBuf::from("a.png"));
                assert_eq!(first, "one");
                assert_eq!(second, "two");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn step_ids_must_be_present_and_unique() {
        let plan = VerificationPlan::new("p", "").step(Step::new(" "));
        assert!(matches!(
            validate_plan(&plan),
            Err(PlanError::EmptyStepId { index: 0 })
        ));

        let plan = VerificationPlan::new("p", "")
            .step(Step::new("a"))
            .step(Step::new("a"));
        assert!(matches!(
            validate_plan(&plan),
            Err(PlanError::DuplicateStepId { .. })
        ));
    }

    #[test]
    fn absolute_capture_path_is_rejected() {
        let plan =
            VerificationPlan::new("p", "").step(Step::new("a").capture_full_page("/etc/a.png"));
        assert!(matches!(
            validate_plan(&plan),
            Err(PlanError::InvalidCapturePath { .. })
        ));
    }

    #[tokio::test]
    async fn capture_writes_file_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new();
        let mut sink = CaptureSink::new(dir.path());

        let written = sink
            .capture(&page, &CaptureTarget::FullPage, Path::new("shots/home.png"))
            .await
            .unwrap();
        assert_eq!(written, dir.path().join("shots/home.png"));
        assert!(written.exists());
        assert!(page.screenshots()[0].full_page);

        let err = sink
            .capture(&page, &CaptureTarget::Viewport, Path::new("shots/./home.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::DuplicatePath(_)));
    }

    #[tokio::test]
    async fn element_capture_clips_to_document_box() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new().with_element(".hero", FakePage::element_at(10.0, 20.0, 100.0, 50.0));
        page.set_scroll(0.0, 300.0);
        let mut sink = CaptureSink::new(dir.path());

        sink.capture(
            &page,
            &CaptureTarget::Element {
                locator: ElementLocator::css(".hero"),
            },
            Path::new("hero.png"),
        )
        .await
        .unwrap();

        let clip = page.screenshots()[0].clip.unwrap();
        assert_eq!(clip.y, 320.0);
        assert_eq!(clip.height, 50.0);
    }

    #[tokio::test]
    async fn missing_element_capture_is_typed_failure() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new();
        let mut sink = CaptureSink::new(dir.path());
        let err = sink
            .capture(
                &page,
                &CaptureTarget::Element {
                    locator: ElementLocator::css(".missing"),
                },
                Path::new("missing.png"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NotFound(_)));
        assert!(!dir.path().join("missing.png").exists());
        assert!(page.screenshots().is_empty());
    }

    #[tokio::test]
    async fn assertions_report_pass_and_fail_messages() {
        let page = FakePage::new()
            .with_element("nav", FakePage::element_at(0.0, 0.0, 375.0, 60.0))
            .with_text("Selected Projects")
            .with_script("document.body.style.overflow", serde_json::json!("hidden"))
            .with_style(".hero img", "max-height", "400px");

        let visible = assert(
            &page,
            "nav visible",
            &Check::Visible {
                locator: ElementLocator::css("nav"),
            },
        )
        .await;
        assert!(visible.pass, "{}", visible.message);

        let overlay_gone = assert(
            &page,
            "overlay closed",
            &Check::NotVisible {
                locator: ElementLocator::css(".cursor-zoom-out"),
            },
        )
        .await;
        assert!(overlay_gone.pass);

        let text = assert(
            &page,
            "projects heading",
            &Check::TextPresent {
                text: "Selected Projects".into(),
            },
        )
        .await;
        assert!(text.pass);

        let locked = assert(
            &page,
            "scroll locked",
            &Check::ScriptEquals {
                expression: "document.body.style.overflow".into(),
                expected: serde_json::json!("hidden"),
            },
        )
        .await;
        assert!(locked.pass);

        let style = assert(
            &page,
            "image constrained",
            &Check::StyleEquals {
                locator: ElementLocator::css(".hero img"),
                property: "max-height".into(),
                expected: "600px".into(),
            },
        )
        .await;
        assert!(!style.pass);
        assert_eq!(style.message, "max-height is '400px', expected '600px'");

        let alt = assert(
            &page,
            "alt",
            &Check::AltTextPresent {
                text: "Arduino".into(),
            },
        )
        .await;
        assert!(!alt.pass);
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(json_matches(&serde_json::json!(1), &serde_json::json!(1.0)));
        assert!(!json_matches(&serde_json::json!("1"), &serde_json::json!(1)));
    }
}
