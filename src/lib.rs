//! Scripted visual verification for a running web frontend.
//!
//! A [`VerificationPlan`] is an ordered list of steps (navigate, wait for
//! readiness, interact, assert, capture). [`run_plan`] opens one headless
//! Chromium session, executes the steps in order, and returns a
//! [`RunReport`] with one entry per step plus screenshots on disk.

pub mod browser;
pub mod config;
pub mod dom_scripts;
pub mod executor;
pub mod harness;
pub mod logging;
pub mod page;
pub mod plans;
pub mod report;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod step;

pub use browser::{BrowserRuntime, BrowserRuntimeError, ColorScheme, Viewport};
pub use config::{ConfigError, HarnessConfig, Verbosity};
pub use harness::{RunError, run_plan};
pub use logging::HarnessLogger;
pub use report::{RunReport, StepOutcome};
pub use runtime::ChromiumoxideRuntime;
pub use step::{PlanError, Step, VerificationPlan};
