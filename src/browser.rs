//! Browser automation capability consumed by the harness.
//!
//! [`BrowserRuntime`] is the narrow surface the session controller and the
//! page wrapper need from a driver: launch, open configured pages, navigate,
//! evaluate script, dispatch native input and take screenshots. The
//! production implementation lives in [`crate::runtime`]; tests substitute
//! in-memory fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Identifier handed out by [`BrowserRuntime::new_page`].
pub type PageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Narrow viewports are emulated as mobile devices.
    pub fn is_mobile(&self) -> bool {
        self.width < 768
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// `prefers-color-scheme` emulation for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorScheme {
    Light,
    Dark,
    #[default]
    NoPreference,
}

impl ColorScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
            ColorScheme::NoPreference => "no-preference",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(ColorScheme::Light),
            "dark" => Some(ColorScheme::Dark),
            "no-preference" | "none" => Some(ColorScheme::NoPreference),
            _ => None,
        }
    }
}

/// Everything needed to start one browser process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchPlan {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub viewport: Option<Viewport>,
    pub args: Vec<String>,
}

/// Per-page emulation applied before the first navigation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageSetup {
    pub url: String,
    pub viewport: Option<Viewport>,
    pub color_scheme: ColorScheme,
    /// Scripts evaluated on every new document before page scripts run.
    pub init_scripts: Vec<String>,
}

impl PageSetup {
    /// Build the init script that writes local-state overrides into
    /// `localStorage` ahead of the application's own scripts.
    pub fn local_storage_script(entries: &BTreeMap<String, String>) -> Option<String> {
        if entries.is_empty() {
            return None;
        }
        let payload = serde_json::to_string(entries).ok()?;
        Some(format!(
            "(() => {{ try {{ const entries = {payload}; \
             for (const [k, v] of Object.entries(entries)) {{ window.localStorage.setItem(k, v); }} \
             }} catch (e) {{}} }})();"
        ))
    }
}

/// Viewport-relative CSS pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Largest absolute difference between the edges of two boxes.
    pub fn max_delta(&self, other: &BoundingBox) -> f64 {
        [
            (self.x - other.x).abs(),
            (self.y - other.y).abs(),
            (self.width - other.width).abs(),
            (self.height - other.height).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenshotRequest {
    pub full_page: bool,
    /// Document-relative clip rectangle.
    pub clip: Option<BoundingBox>,
}

#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    async fn launch(&self, plan: &LaunchPlan) -> Result<(), BrowserRuntimeError>;

    /// Release the browser process. Calling it again is a no-op.
    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported(
            "shutdown not supported by this runtime".into(),
        ))
    }

    /// Best-effort synchronous release for an owner dropped without
    /// calling [`shutdown`](Self::shutdown). Must not block.
    fn abandon(&self) {}

    async fn new_page(&self, setup: &PageSetup) -> Result<PageId, BrowserRuntimeError>;

    /// Navigate and wait for the load to complete.
    async fn navigate(&self, page: &str, url: &str) -> Result<(), BrowserRuntimeError>;

    /// Evaluate an expression in page context, awaiting promises.
    async fn evaluate(&self, page: &str, expression: &str)
    -> Result<JsonValue, BrowserRuntimeError>;

    async fn set_viewport(&self, _page: &str, _viewport: Viewport) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported(
            "viewport emulation not supported by this runtime".into(),
        ))
    }

    async fn mouse_click(&self, page: &str, point: Point) -> Result<(), BrowserRuntimeError>;

    async fn mouse_move(&self, page: &str, point: Point) -> Result<(), BrowserRuntimeError>;

    async fn mouse_wheel(
        &self,
        _page: &str,
        _point: Point,
        _delta_x: f64,
        _delta_y: f64,
    ) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported(
            "mouse wheel not supported by this runtime".into(),
        ))
    }

    async fn press_key(&self, _page: &str, _key: &str) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported(
            "keyboard input not supported by this runtime".into(),
        ))
    }

    /// PNG-encoded screenshot.
    async fn screenshot(
        &self,
        page: &str,
        request: &ScreenshotRequest,
    ) -> Result<Vec<u8>, BrowserRuntimeError>;
}

#[derive(Debug, Error)]
pub enum BrowserRuntimeError {
    #[error("browser runtime error: {0}")]
    Message(String),
    #[error("browser runtime not initialized")]
    NotInitialized,
    #[error("unknown page {0}")]
    UnknownPage(String),
    #[error("browser runtime feature unsupported: {0}")]
    Unsupported(String),
}
