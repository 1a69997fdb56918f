//! Declarative verification steps.
//!
//! A [`VerificationPlan`] is an ordered list of [`Step`]s. Each step names a
//! navigation target, a readiness condition, an optional interaction, any
//! number of assertions and an optional capture. Plans are plain data: they
//! can be authored in Rust with the builder methods below or loaded from
//! JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::browser::{ColorScheme, Viewport};

/// How an element is found on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocateBy {
    /// CSS selector, optionally requiring a descendant matching `has`.
    Css {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        has: Option<String>,
    },
    /// Innermost elements whose text contains `text` (or equals it when `exact`).
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    /// Images whose `alt` attribute contains `text`.
    Alt { text: String },
    /// Explicit or implicit ARIA role, optionally filtered by accessible name.
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementLocator {
    #[serde(flatten)]
    pub by: LocateBy,
    /// Zero-based index into the matches.
    #[serde(default)]
    pub nth: usize,
}

impl ElementLocator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::from(LocateBy::Css {
            selector: selector.into(),
            has: None,
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::from(LocateBy::Text {
            text: text.into(),
            exact: false,
        })
    }

    pub fn exact_text(text: impl Into<String>) -> Self {
        Self::from(LocateBy::Text {
            text: text.into(),
            exact: true,
        })
    }

    pub fn alt(text: impl Into<String>) -> Self {
        Self::from(LocateBy::Alt { text: text.into() })
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::from(LocateBy::Role {
            role: role.into(),
            name: name.map(str::to_string),
        })
    }

    /// Require a descendant matching `selector`. Only meaningful for CSS locators.
    pub fn has(mut self, selector: impl Into<String>) -> Self {
        if let LocateBy::Css { has, .. } = &mut self.by {
            *has = Some(selector.into());
        }
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.nth = index;
        self
    }
}

impl From<LocateBy> for ElementLocator {
    fn from(by: LocateBy) -> Self {
        Self { by, nth: 0 }
    }
}

impl fmt::Display for ElementLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.by {
            LocateBy::Css { selector, has: None } => write!(f, "css={selector}")?,
            LocateBy::Css {
                selector,
                has: Some(has),
            } => write!(f, "css={selector}:has({has})")?,
            LocateBy::Text { text, exact: false } => write!(f, "text={text}")?,
            LocateBy::Text { text, exact: true } => write!(f, "text=\"{text}\"")?,
            LocateBy::Alt { text } => write!(f, "alt={text}")?,
            LocateBy::Role { role, name: None } => write!(f, "role={role}")?,
            LocateBy::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name={name}]")?,
        }
        if self.nth > 0 {
            write!(f, " >> nth={}", self.nth)?;
        }
        Ok(())
    }
}

/// Where a step points the active page before doing anything else.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Navigation {
    /// Full load of a route (joined to the base URL unless absolute).
    Goto { route: String },
    /// Client-side route change without a reload.
    InApp { route: String },
    /// Keep acting on whatever the page currently shows.
    #[default]
    Stay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    #[default]
    Visible,
    Hidden,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessCondition {
    /// Navigation completion alone.
    #[default]
    Load,
    Selector {
        locator: ElementLocator,
        #[serde(default)]
        state: ElementState,
    },
    /// Some element with this visible text exists.
    Text { text: String },
    /// Fixed delay. Prefer an observable condition.
    Delay { ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Readiness {
    #[serde(flatten)]
    pub condition: ReadinessCondition,
    /// Overrides the configured readiness timeout for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A single page action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Click {
        locator: ElementLocator,
    },
    Hover {
        locator: ElementLocator,
    },
    ScrollIntoView {
        locator: ElementLocator,
    },
    /// Mouse wheel at the viewport centre, or over `locator` when given.
    ScrollBy {
        #[serde(default)]
        dx: f64,
        dy: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<ElementLocator>,
    },
    ScrollTo {
        x: f64,
        y: f64,
    },
    Evaluate {
        script: String,
    },
    Press {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<ElementLocator>,
    },
    Resize {
        viewport: Viewport,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Hover { .. } => "hover",
            Action::ScrollIntoView { .. } => "scroll_into_view",
            Action::ScrollBy { .. } => "scroll_by",
            Action::ScrollTo { .. } => "scroll_to",
            Action::Evaluate { .. } => "evaluate",
            Action::Press { .. } => "press",
            Action::Resize { .. } => "resize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub action: Action,
    /// Skip actionability checks and dispatch the DOM event directly.
    #[serde(default)]
    pub force: bool,
    /// Direct state mutation used when the primary action cannot run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_script: Option<String>,
    /// Delay after the interaction for transitions to finish.
    #[serde(default)]
    pub settle_ms: u64,
}

impl Interaction {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            force: false,
            fallback_script: None,
            settle_ms: 0,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_fallback(mut self, script: impl Into<String>) -> Self {
        self.fallback_script = Some(script.into());
        self
    }

    pub fn settle(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }
}

fn default_tolerance_px() -> f64 {
    1.0
}

fn default_box_settle_ms() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    Visible {
        locator: ElementLocator,
    },
    NotVisible {
        locator: ElementLocator,
    },
    TextPresent {
        text: String,
    },
    AltTextPresent {
        text: String,
    },
    StyleEquals {
        locator: ElementLocator,
        property: String,
        expected: String,
    },
    ScriptEquals {
        expression: String,
        expected: JsonValue,
    },
    /// Observe the box, run `perturb`, observe again, compare.
    BoxStable {
        locator: ElementLocator,
        perturb: Action,
        #[serde(default = "default_tolerance_px")]
        tolerance_px: f64,
        #[serde(default = "default_box_settle_ms")]
        settle_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub description: String,
    pub check: Check,
}

impl Assertion {
    pub fn new(description: impl Into<String>, check: Check) -> Self {
        Self {
            description: description.into(),
            check,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureTarget {
    #[default]
    FullPage,
    Viewport,
    Element {
        locator: ElementLocator,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Relative to the configured output directory.
    pub path: PathBuf,
    #[serde(default)]
    pub target: CaptureTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub navigation: Navigation,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<Interaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Capture>,
}

impl Step {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            navigation: Navigation::Stay,
            readiness: Readiness::default(),
            interaction: None,
            assertions: Vec::new(),
            capture: None,
        }
    }

    pub fn goto(mut self, route: impl Into<String>) -> Self {
        self.navigation = Navigation::Goto {
            route: route.into(),
        };
        self
    }

    pub fn in_app(mut self, route: impl Into<String>) -> Self {
        self.navigation = Navigation::InApp {
            route: route.into(),
        };
        self
    }

    pub fn wait_for(mut self, condition: ReadinessCondition) -> Self {
        self.readiness.condition = condition;
        self
    }

    pub fn wait_for_text(self, text: impl Into<String>) -> Self {
        self.wait_for(ReadinessCondition::Text { text: text.into() })
    }

    pub fn wait_for_visible(self, locator: ElementLocator) -> Self {
        self.wait_for(ReadinessCondition::Selector {
            locator,
            state: ElementState::Visible,
        })
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.readiness.timeout_ms = Some(ms);
        self
    }

    pub fn interact(mut self, interaction: Interaction) -> Self {
        self.interaction = Some(interaction);
        self
    }

    pub fn assert(mut self, description: impl Into<String>, check: Check) -> Self {
        self.assertions.push(Assertion::new(description, check));
        self
    }

    pub fn capture(mut self, path: impl Into<PathBuf>, target: CaptureTarget) -> Self {
        self.capture = Some(Capture {
            path: path.into(),
            target,
        });
        self
    }

    pub fn capture_full_page(self, path: impl Into<PathBuf>) -> Self {
        self.capture(path, CaptureTarget::FullPage)
    }
}

/// Unit of execution: one session, one ordered step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationPlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the configured viewport for this plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<ColorScheme>,
    /// Merged over the configured local-state overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_storage: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl VerificationPlan {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            viewport: None,
            color_scheme: None,
            local_storage: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_color_scheme(mut self, scheme: ColorScheme) -> Self {
        self.color_scheme = Some(scheme);
        self
    }

    pub fn with_local_storage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.local_storage.insert(key.into(), value.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn from_json(source: &str) -> Result<Self, PlanError> {
        serde_json::from_str(source).map_err(PlanError::Parse)
    }

    /// True when no step navigates to a route relative to the base URL.
    pub fn uses_only_absolute_urls(&self) -> bool {
        self.steps.iter().all(|step| match &step.navigation {
            Navigation::Goto { route } => crate::config::is_absolute_url(route),
            Navigation::InApp { .. } => true,
            Navigation::Stay => true,
        })
    }
}

/// Configuration errors in a plan, detected before any browser is launched.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to parse plan: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("step {index} has an empty id")]
    EmptyStepId { index: usize },
    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: String },
    #[error("steps '{first}' and '{second}' both capture to {}", path.display())]
    DuplicateCapturePath {
        path: PathBuf,
        first: String,
        second: String,
    },
    #[error("capture path {} of step '{step}' must be relative and stay inside the output directory", path.display())]
    InvalidCapturePath { path: PathBuf, step: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn locator_json_shape_is_flat() {
        let locator = ElementLocator::css("button").has("svg.lucide-moon").nth(1);
        let value = serde_json::to_value(&locator).unwrap();
        assert_eq!(
            value,
            json!({"kind": "css", "selector": "button", "has": "svg.lucide-moon", "nth": 1})
        );
        let parsed: ElementLocator =
            serde_json::from_value(json!({"kind": "text", "text": "Publications"})).unwrap();
        assert_eq!(parsed, ElementLocator::text("Publications"));
    }

    #[test]
    fn has_only_applies_to_css() {
        let locator = ElementLocator::text("Home").has("svg");
        assert_eq!(locator, ElementLocator::text("Home"));
    }

    #[test]
    fn locator_display_is_readable() {
        assert_eq!(
            ElementLocator::role("button", Some("Portfolio")).to_string(),
            "role=button[name=Portfolio]"
        );
        assert_eq!(
            ElementLocator::css("div.group").nth(2).to_string(),
            "css=div.group >> nth=2"
        );
        assert_eq!(
            ElementLocator::exact_text("Telexistence").to_string(),
            "text=\"Telexistence\""
        );
    }

    #[test]
    fn plan_parses_from_json_with_defaults() {
        let plan = VerificationPlan::from_json(
            r#"{
                "name": "smoke",
                "viewport": {"width": 375, "height": 667},
                "color_scheme": "dark",
                "steps": [
                    {
                        "id": "home",
                        "navigation": {"kind": "goto", "route": "/"},
                        "readiness": {"kind": "text", "text": "Home", "timeout_ms": 5000},
                        "interaction": {
                            "action": {"kind": "click", "locator": {"kind": "css", "selector": "button"}},
                            "force": true,
                            "fallback_script": "document.documentElement.classList.toggle('dark')",
                            "settle_ms": 500
                        },
                        "assertions": [
                            {"description": "body locked", "check": {"kind": "script_equals", "expression": "document.body.style.overflow", "expected": "hidden"}}
                        ],
                        "capture": {"path": "home.png"}
                    },
                    {"id": "later"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.viewport, Some(Viewport::new(375, 667)));
        assert_eq!(plan.color_scheme, Some(ColorScheme::Dark));
        let first = &plan.steps[0];
        assert_eq!(first.readiness.timeout_ms, Some(5000));
        assert_eq!(
            first.readiness.condition,
            ReadinessCondition::Text {
                text: "Home".into()
            }
        );
        let interaction = first.interaction.as_ref().unwrap();
        assert!(interaction.force);
        assert_eq!(interaction.settle_ms, 500);
        assert_eq!(
            first.capture.as_ref().unwrap().target,
            CaptureTarget::FullPage
        );

        let later = &plan.steps[1];
        assert_eq!(later.navigation, Navigation::Stay);
        assert_eq!(later.readiness.condition, ReadinessCondition::Load);
        assert!(later.interaction.is_none());
    }

    #[test]
    fn box_stable_defaults_apply() {
        let check: Check = serde_json::from_value(json!({
            "kind": "box_stable",
            "locator": {"kind": "css", "selector": "div.group"},
            "perturb": {"kind": "hover", "locator": {"kind": "css", "selector": "div.group", "nth": 1}}
        }))
        .unwrap();
        match check {
            Check::BoxStable {
                tolerance_px,
                settle_ms,
                ..
            } => {
                assert_eq!(tolerance_px, 1.0);
                assert_eq!(settle_ms, 300);
            }
            other => panic!("unexpected check {other:?}"),
        }
    }

    #[test]
    fn malformed_plan_is_a_parse_error() {
        let err = VerificationPlan::from_json(r#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, PlanError::Parse(_)));
    }

    #[test]
    fn absolute_url_detection() {
        let plan = VerificationPlan::new("p", "")
            .step(Step::new("a").goto("data:text/html,<p>x</p>"))
            .step(Step::new("b").in_app("#/x"));
        assert!(plan.uses_only_absolute_urls());
        let plan = plan.step(Step::new("c").goto("/"));
        assert!(!plan.uses_only_absolute_urls());

        let host_port = VerificationPlan::new("p", "").step(Step::new("a").goto("localhost:5173/x"));
        assert!(!host_port.uses_only_absolute_urls());
    }

    #[test]
    fn action_names_match_wire_tags() {
        let hover = Action::Hover {
            locator: ElementLocator::css("a"),
        };
        assert_eq!(hover.name(), "hover");
        assert_eq!(Action::ScrollTo { x: 0.0, y: 10.0 }.name(), "scroll_to");
    }
}
