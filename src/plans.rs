//! Built-in verification plans for the portfolio frontend.
//!
//! Routes, texts and class names here are the application's contract: when
//! the UI changes, these change with it.

use crate::browser::Viewport;
use crate::step::{
    Action, CaptureTarget, Check, ElementLocator, ElementState, Interaction, ReadinessCondition,
    Step, VerificationPlan,
};

/// Flip the `dark` class on the root element without going through the UI.
pub const THEME_TOGGLE_FALLBACK: &str = "document.documentElement.classList.toggle('dark')";

const ARDUINO_ROUTE: &str = "/#/project/arduino-unity";

/// Project routes covered by `project-pages`, with the capture file stem.
pub const PROJECT_ROUTES: [(&str, &str); 6] = [
    ("telexistence-interface", "telexistence_interface"),
    ("remote-collab", "remote_collab"),
    ("remote-maintenance", "remote_maintenance"),
    ("vr-prototyping", "vr_prototyping"),
    ("hci-course", "hci_course"),
    ("master-projects", "master_projects"),
];

type PlanBuilder = fn() -> VerificationPlan;

const BUILTINS: [(&str, PlanBuilder); 6] = [
    ("home-theme", home_theme),
    ("arduino-fixes", arduino_fixes),
    ("hover-layout", hover_layout),
    ("mobile-layout", mobile_layout),
    ("home-performance", home_performance),
    ("project-pages", project_pages),
];

/// Names of every built-in plan, in a stable order.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

pub fn builtin(name: &str) -> Option<VerificationPlan> {
    BUILTINS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, build)| build())
}

pub fn all() -> Vec<VerificationPlan> {
    BUILTINS.iter().map(|(_, build)| build()).collect()
}

fn theme_toggle() -> Interaction {
    Interaction::new(Action::Click {
        locator: ElementLocator::css("button").has("svg.lucide-moon, svg.lucide-sun"),
    })
    .forced()
    .with_fallback(THEME_TOGGLE_FALLBACK)
    .settle(1_000)
}

fn zoomable() -> ElementLocator {
    ElementLocator::css(".cursor-zoom-in")
}

fn zoom_overlay() -> ElementLocator {
    ElementLocator::css(".cursor-zoom-out")
}

fn heading() -> ReadinessCondition {
    ReadinessCondition::Selector {
        locator: ElementLocator::css("h1"),
        state: ElementState::Visible,
    }
}

pub fn home_theme() -> VerificationPlan {
    VerificationPlan::new(
        "home-theme",
        "Light and dark backgrounds, project page in both themes, zoomable image",
    )
    .step(
        Step::new("home-light")
            .goto("/")
            .wait_for(heading())
            .capture_full_page("1_home_light.png"),
    )
    .step(
        Step::new("home-dark")
            .interact(theme_toggle())
            .assert(
                "dark class applied",
                Check::ScriptEquals {
                    expression: "document.documentElement.classList.contains('dark')".into(),
                    expected: true.into(),
                },
            )
            .capture_full_page("2_home_dark.png"),
    )
    .step(
        Step::new("arduino-dark")
            .goto(ARDUINO_ROUTE)
            .wait_for(heading())
            .capture_full_page("3_arduino_dark.png"),
    )
    .step(
        Step::new("arduino-light")
            .interact(theme_toggle())
            .capture_full_page("4_arduino_light.png"),
    )
    .step(
        Step::new("arduino-zoomed")
            .interact(
                Interaction::new(Action::Click { locator: zoomable() })
                    .forced()
                    .settle(1_000),
            )
            .assert(
                "zoom overlay open",
                Check::Visible {
                    locator: zoom_overlay(),
                },
            )
            .capture_full_page("5_arduino_zoomed.png"),
    )
    .step(
        Step::new("arduino-zoom-closed")
            .interact(
                Interaction::new(Action::Click {
                    locator: zoom_overlay(),
                })
                .forced()
                .settle(500),
            )
            .assert(
                "zoom overlay closed",
                Check::NotVisible {
                    locator: zoom_overlay(),
                },
            ),
    )
}

pub fn arduino_fixes() -> VerificationPlan {
    VerificationPlan::new(
        "arduino-fixes",
        "Troubleshooting checklist, constrained images, body scroll lock while zoomed",
    )
    .step(
        Step::new("checklist")
            .goto(ARDUINO_ROUTE)
            .wait_for_text("Troubleshooting Checklist")
            .interact(
                Interaction::new(Action::ScrollIntoView {
                    locator: ElementLocator::text("Troubleshooting Checklist"),
                })
                .settle(500),
            )
            .capture_full_page("checklist_new.png"),
    )
    .step(
        Step::new("images-constrained")
            .interact(Interaction::new(Action::ScrollTo { x: 0.0, y: 0.0 }).settle(500))
            .capture("arduino_images_constrained.png", CaptureTarget::Viewport),
    )
    .step(
        Step::new("zoom-scroll-lock")
            .interact(Interaction::new(Action::Click { locator: zoomable() }).settle(1_000))
            .assert(
                "body scroll locked while zoomed",
                Check::ScriptEquals {
                    expression: "document.body.style.overflow".into(),
                    expected: "hidden".into(),
                },
            )
            .capture("zoom_locked.png", CaptureTarget::Viewport),
    )
}

pub fn hover_layout() -> VerificationPlan {
    let second_card = ElementLocator::css("div.group").nth(1);
    VerificationPlan::new(
        "hover-layout",
        "Hovering a publication card must not shift its neighbours",
    )
    .step(
        Step::new("home")
            .goto("/")
            .wait_for(heading())
            .capture_full_page("home_initial.png"),
    )
    .step(
        Step::new("publications")
            .interact(
                Interaction::new(Action::Click {
                    locator: ElementLocator::text("Publications"),
                })
                .settle(1_000),
            )
            .assert(
                "neighbour card stays put on hover",
                Check::BoxStable {
                    locator: second_card,
                    perturb: Action::Hover {
                        locator: ElementLocator::css("div.group"),
                    },
                    tolerance_px: 1.0,
                    settle_ms: 500,
                },
            )
            .capture("hover_state.png", CaptureTarget::Viewport),
    )
}

pub fn mobile_layout() -> VerificationPlan {
    VerificationPlan::new("mobile-layout", "Home and portfolio at iPhone SE size")
        .with_viewport(Viewport::new(375, 667))
        .step(
            Step::new("mobile-home")
                .goto("/")
                .wait_for_text("Damien Mazeas, PhD")
                .assert(
                    "navigation visible",
                    Check::Visible {
                        locator: ElementLocator::css("nav"),
                    },
                )
                .capture("mobile_home.png", CaptureTarget::Viewport),
        )
        .step(
            Step::new("mobile-portfolio")
                .interact(
                    Interaction::new(Action::Click {
                        locator: ElementLocator::role("button", Some("Portfolio")),
                    })
                    .settle(1_000),
                )
                .assert(
                    "portfolio banner visible",
                    Check::TextPresent {
                        text: "Selected Projects".into(),
                    },
                )
                .capture("mobile_portfolio.png", CaptureTarget::Viewport),
        )
        .step(
            Step::new("mobile-portfolio-scrolled")
                .interact(
                    Interaction::new(Action::ScrollBy {
                        dx: 0.0,
                        dy: 200.0,
                        locator: None,
                    })
                    .settle(500),
                )
                .capture("mobile_portfolio_scrolled.png", CaptureTarget::Viewport),
        )
}

pub fn home_performance() -> VerificationPlan {
    VerificationPlan::new(
        "home-performance",
        "Hero renders, below-the-fold content loads on scroll",
    )
    .step(
        Step::new("home")
            .goto("/")
            .wait_for_text("Bridging")
            .capture_full_page("optimized_home.png"),
    )
    .step(
        Step::new("home-scrolled")
            .interact(
                Interaction::new(Action::Evaluate {
                    script: "window.scrollTo(0, document.body.scrollHeight)".into(),
                })
                .settle(1_000),
            )
            .capture("optimized_home_scrolled.png", CaptureTarget::Viewport),
    )
}

pub fn project_pages() -> VerificationPlan {
    PROJECT_ROUTES.iter().fold(
        VerificationPlan::new("project-pages", "Each project detail page renders"),
        |plan, (slug, stem)| {
            let mut step = Step::new(*slug)
                .goto(format!("/#/project/{slug}"))
                .wait_for(heading())
                .capture_full_page(format!("{stem}.png"));
            if *slug == "remote-maintenance" {
                step = step.assert(
                    "renamed title",
                    Check::Visible {
                        locator: ElementLocator::exact_text("Telexistence for Remote Maintenance"),
                    },
                );
            }
            plan.step(step)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::validate_plan;

    #[test]
    fn every_builtin_validates() {
        for plan in all() {
            validate_plan(&plan).unwrap_or_else(|err| panic!("{}: {err}", plan.name));
            assert!(!plan.steps.is_empty(), "{} has no steps", plan.name);
        }
    }

    #[test]
    fn names_match_plans() {
        for name in names() {
            assert_eq!(builtin(name).unwrap().name, name);
        }
        assert!(builtin("nope").is_none());
    }

    #[test]
    fn builtins_survive_json() {
        for plan in all() {
            let json = serde_json::to_string(&plan).unwrap();
            assert_eq!(VerificationPlan::from_json(&json).unwrap(), plan);
        }
    }

    #[test]
    fn mobile_plan_pins_viewport() {
        let plan = mobile_layout();
        assert_eq!(plan.viewport, Some(Viewport::new(375, 667)));
        assert!(!plan.uses_only_absolute_urls());
    }

    #[test]
    fn project_pages_cover_every_route() {
        let plan = project_pages();
        assert_eq!(plan.steps.len(), PROJECT_ROUTES.len());
        assert_eq!(plan.steps[2].assertions.len(), 1);
    }
}
