//! Page surface driven by the step executor.
//!
//! [`PageOps`] is what one step needs from "the active page": navigation,
//! script evaluation, element probing, native and synthetic input, and
//! screenshots. [`SessionPage`] implements it over any
//! [`BrowserRuntime`] by pairing the runtime with a page id and the
//! page-context scripts from [`crate::dom_scripts`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::browser::{BoundingBox, BrowserRuntime, BrowserRuntimeError, Point, ScreenshotRequest, Viewport};
use crate::dom_scripts::{self, DomEvent};
use crate::step::ElementLocator;

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Runtime(#[from] BrowserRuntimeError),
    #[error("no element matches {0}")]
    NotFound(String),
    #[error("unexpected script result: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Snapshot of one locator's target, taken in a single script round-trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementProbe {
    /// Number of elements the locator matched.
    pub count: usize,
    /// Whether the `nth` match exists.
    pub found: bool,
    pub visible: bool,
    pub enabled: bool,
    /// Viewport-relative.
    pub bounding_box: Option<BoundingBox>,
    /// The element (or a descendant) is topmost at its own centre.
    pub hit_target: bool,
    pub scroll: ScrollOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub x: f64,
    pub y: f64,
}

impl ElementProbe {
    pub fn is_actionable(&self) -> bool {
        self.found
            && self.visible
            && self.enabled
            && self.hit_target
            && self.bounding_box.is_some_and(|b| !b.is_empty())
    }

    /// Bounding box translated to document coordinates.
    pub fn document_box(&self) -> Option<BoundingBox> {
        self.bounding_box.map(|b| BoundingBox {
            x: b.x + self.scroll.x,
            y: b.y + self.scroll.y,
            ..b
        })
    }
}

#[async_trait]
pub trait PageOps: Send + Sync {
    /// Full navigation, resolving once the load completes.
    async fn goto(&self, url: &str) -> Result<(), PageError>;

    /// Client-side route change without a reload.
    async fn navigate_in_app(&self, route: &str) -> Result<(), PageError>;

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, PageError>;

    async fn probe(&self, locator: &ElementLocator) -> Result<ElementProbe, PageError>;

    /// True when at least one match of `locator` is visible.
    async fn any_visible(&self, locator: &ElementLocator) -> Result<bool, PageError>;

    /// Synthetic DOM event on the target, bypassing actionability.
    async fn dispatch(&self, locator: &ElementLocator, event: DomEvent) -> Result<(), PageError>;

    async fn scroll_into_view(&self, locator: &ElementLocator) -> Result<(), PageError>;

    async fn focus(&self, locator: &ElementLocator) -> Result<(), PageError>;

    async fn computed_style(
        &self,
        locator: &ElementLocator,
        property: &str,
    ) -> Result<Option<String>, PageError>;

    async fn mouse_click(&self, point: Point) -> Result<(), PageError>;

    async fn mouse_move(&self, point: Point) -> Result<(), PageError>;

    async fn mouse_wheel(&self, point: Point, delta_x: f64, delta_y: f64) -> Result<(), PageError>;

    async fn press_key(&self, key: &str) -> Result<(), PageError>;

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), PageError>;

    /// Current layout viewport size in CSS pixels.
    async fn viewport_size(&self) -> Result<Viewport, PageError>;

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, PageError>;
}

/// A page owned by a session, addressed through its runtime.
pub struct SessionPage<'s, R: BrowserRuntime> {
    runtime: &'s R,
    page_id: String,
}

impl<'s, R: BrowserRuntime> SessionPage<'s, R> {
    pub fn new(runtime: &'s R, page_id: impl Into<String>) -> Self {
        Self {
            runtime,
            page_id: page_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.page_id
    }

    async fn evaluate_bool(&self, script: String) -> Result<bool, PageError> {
        let value = self.runtime.evaluate(&self.page_id, &script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl<'s, R: BrowserRuntime> PageOps for SessionPage<'s, R> {
    async fn goto(&self, url: &str) -> Result<(), PageError> {
        self.runtime.navigate(&self.page_id, url).await?;
        Ok(())
    }

    async fn navigate_in_app(&self, route: &str) -> Result<(), PageError> {
        self.runtime
            .evaluate(&self.page_id, &dom_scripts::in_app_navigation_script(route))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, PageError> {
        Ok(self.runtime.evaluate(&self.page_id, expression).await?)
    }

    async fn probe(&self, locator: &ElementLocator) -> Result<ElementProbe, PageError> {
        let value = self
            .runtime
            .evaluate(&self.page_id, &dom_scripts::probe_script(locator))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn any_visible(&self, locator: &ElementLocator) -> Result<bool, PageError> {
        self.evaluate_bool(dom_scripts::any_visible_script(locator))
            .await
    }

    async fn dispatch(&self, locator: &ElementLocator, event: DomEvent) -> Result<(), PageError> {
        if self
            .evaluate_bool(dom_scripts::dispatch_script(locator, event))
            .await?
        {
            Ok(())
        } else {
            Err(PageError::NotFound(locator.to_string()))
        }
    }

    async fn scroll_into_view(&self, locator: &ElementLocator) -> Result<(), PageError> {
        if self
            .evaluate_bool(dom_scripts::scroll_into_view_script(locator))
            .await?
        {
            Ok(())
        } else {
            Err(PageError::NotFound(locator.to_string()))
        }
    }

    async fn focus(&self, locator: &ElementLocator) -> Result<(), PageError> {
        if self.evaluate_bool(dom_scripts::focus_script(locator)).await? {
            Ok(())
        } else {
            Err(PageError::NotFound(locator.to_string()))
        }
    }

    async fn computed_style(
        &self,
        locator: &ElementLocator,
        property: &str,
    ) -> Result<Option<String>, PageError> {
        let value = self
            .runtime
            .evaluate(
                &self.page_id,
                &dom_scripts::computed_style_script(locator, property),
            )
            .await?;
        Ok(value.as_str().map(|s| s.trim().to_string()))
    }

    async fn mouse_click(&self, point: Point) -> Result<(), PageError> {
        Ok(self.runtime.mouse_click(&self.page_id, point).await?)
    }

    async fn mouse_move(&self, point: Point) -> Result<(), PageError> {
        Ok(self.runtime.mouse_move(&self.page_id, point).await?)
    }

    async fn mouse_wheel(&self, point: Point, delta_x: f64, delta_y: f64) -> Result<(), PageError> {
        Ok(self
            .runtime
            .mouse_wheel(&self.page_id, point, delta_x, delta_y)
            .await?)
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        Ok(self.runtime.press_key(&self.page_id, key).await?)
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), PageError> {
        Ok(self.runtime.set_viewport(&self.page_id, viewport).await?)
    }

    async fn viewport_size(&self) -> Result<Viewport, PageError> {
        let value = self
            .runtime
            .evaluate(
                &self.page_id,
                "({ width: window.innerWidth, height: window.innerHeight })",
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, PageError> {
        Ok(self.runtime.screenshot(&self.page_id, request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::browser::{LaunchPlan, PageId, PageSetup};

    /// Runtime that answers every evaluation with a canned value and
    /// remembers the scripts it was given.
    struct ScriptedRuntime {
        answer: JsonValue,
        scripts: Mutex<Vec<String>>,
    }

    impl ScriptedRuntime {
        fn answering(answer: JsonValue) -> Self {
            Self {
                answer,
                scripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserRuntime for ScriptedRuntime {
        async fn launch(&self, _plan: &LaunchPlan) -> Result<(), BrowserRuntimeError> {
            Ok(())
        }

        async fn new_page(&self, _setup: &PageSetup) -> Result<PageId, BrowserRuntimeError> {
            Ok("p".into())
        }

        async fn navigate(&self, _page: &str, _url: &str) -> Result<(), BrowserRuntimeError> {
            Ok(())
        }

        async fn evaluate(&self, _page: &str, expression: &str) -> Result<JsonValue, BrowserRuntimeError> {
            self.scripts.lock().unwrap().push(expression.to_string());
            Ok(self.answer.clone())
        }

        async fn mouse_click(&self, _page: &str, _point: Point) -> Result<(), BrowserRuntimeError> {
            Ok(())
        }

        async fn mouse_move(&self, _page: &str, _point: Point) -> Result<(), BrowserRuntimeError> {
            Ok(())
        }

        async fn screenshot(
            &self,
            _page: &str,
            _request: &ScreenshotRequest,
        ) -> Result<Vec<u8>, BrowserRuntimeError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn probe_decodes_script_result() {
        let runtime = ScriptedRuntime::answering(serde_json::json!({
            "count": 2,
            "found": true,
            "visible": true,
            "enabled": true,
            "boundingBox": {"x": 10.0, "y": 20.0, "width": 30.0, "height": 40.0},
            "hitTarget": true,
            "scroll": {"x": 0.0, "y": 100.0}
        }));
        let page = SessionPage::new(&runtime, "p");

        let probe = page.probe(&ElementLocator::css("button")).await.unwrap();
        assert_eq!(probe.count, 2);
        assert!(probe.is_actionable());
        assert_eq!(
            probe.document_box(),
            Some(BoundingBox {
                x: 10.0,
                y: 120.0,
                width: 30.0,
                height: 40.0
            })
        );
        assert!(runtime.scripts.lock().unwrap()[0].contains("\"selector\":\"button\""));
    }

    #[tokio::test]
    async fn obstructed_element_is_not_actionable() {
        let runtime = ScriptedRuntime::answering(serde_json::json!({
            "count": 1,
            "found": true,
            "visible": true,
            "enabled": true,
            "boundingBox": {"x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0},
            "hitTarget": false,
            "scroll": {"x": 0.0, "y": 0.0}
        }));
        let page = SessionPage::new(&runtime, "p");
        let probe = page.probe(&ElementLocator::css("button")).await.unwrap();
        assert!(!probe.is_actionable());
    }

    #[tokio::test]
    async fn dispatch_reports_missing_target() {
        let runtime = ScriptedRuntime::answering(JsonValue::Bool(false));
        let page = SessionPage::new(&runtime, "p");
        let err = page
            .dispatch(&ElementLocator::css(".cursor-zoom-in"), DomEvent::Click)
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::NotFound(ref loc) if loc == "css=.cursor-zoom-in"));
    }

    #[tokio::test]
    async fn malformed_probe_is_a_decode_error() {
        let runtime = ScriptedRuntime::answering(JsonValue::String("nope".into()));
        let page = SessionPage::new(&runtime, "p");
        let err = page.probe(&ElementLocator::css("a")).await.unwrap_err();
        assert!(matches!(err, PageError::Decode(_)));
    }
}
