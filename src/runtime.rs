//! Chromiumoxide-based browser runtime.
//!
//! Implements [`BrowserRuntime`](crate::browser::BrowserRuntime) on top of
//! the `chromiumoxide` crate: one locally launched Chromium process, a CDP
//! handler task, and a table of open pages keyed by target id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        emulation::{MediaFeature, SetDeviceMetricsOverrideParams},
        input::{
            DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
            DispatchMouseEventType,
        },
        page::{
            AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
            Viewport as ClipViewport,
        },
    },
    handler::viewport::Viewport as HandlerViewport,
    layout::Point as CdpPoint,
    page::{Page as ChromiumPage, ScreenshotParams},
};
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::browser::{
    BrowserRuntime, BrowserRuntimeError, ColorScheme, LaunchPlan, PageId, PageSetup, Point,
    ScreenshotRequest, Viewport,
};

pub struct ChromiumoxideRuntime {
    state: Arc<Mutex<Option<RuntimeState>>>,
}

struct RuntimeState {
    browser: Browser,
    handler: JoinHandle<()>,
    pages: HashMap<PageId, ChromiumPage>,
}

impl ChromiumoxideRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }

    async fn page(&self, page_id: &str) -> Result<ChromiumPage, BrowserRuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(BrowserRuntimeError::NotInitialized)?;
        state
            .pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| BrowserRuntimeError::UnknownPage(page_id.to_string()))
    }
}

impl Default for ChromiumoxideRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserRuntime for ChromiumoxideRuntime {
    async fn launch(&self, plan: &LaunchPlan) -> Result<(), BrowserRuntimeError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let config = build_config(plan)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;

        *guard = Some(RuntimeState {
            browser,
            handler: spawn_handler(handler),
            pages: HashMap::new(),
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        let Some(mut state) = state else {
            return Ok(());
        };

        state.pages.clear();
        let closed = reap(&mut state.browser, REAP_TIMEOUT).await;
        state.handler.abort();
        closed
    }

    fn abandon(&self) {
        let Ok(mut guard) = self.state.try_lock() else {
            return;
        };
        let Some(state) = guard.take() else {
            return;
        };
        state.handler.abort();
        let mut browser = state.browser;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = browser.kill().await;
                });
            }
            // Dropping the browser kills the child process.
            Err(_) => drop(browser),
        }
    }

    async fn new_page(&self, setup: &PageSetup) -> Result<PageId, BrowserRuntimeError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(BrowserRuntimeError::NotInitialized)?;

        let page = state
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_chromiumoxide_error)?;

        if let Some(viewport) = setup.viewport {
            apply_viewport(&page, viewport).await?;
        }

        if setup.color_scheme != ColorScheme::NoPreference {
            page.emulate_media_features(vec![MediaFeature::new(
                "prefers-color-scheme",
                setup.color_scheme.as_str(),
            )])
            .await
            .map_err(map_chromiumoxide_error)?;
        }

        for script in &setup.init_scripts {
            page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                script.clone(),
            ))
            .await
            .map_err(map_chromiumoxide_error)?;
        }

        if !setup.url.is_empty() && setup.url != "about:blank" {
            page.goto(setup.url.as_str())
                .await
                .map_err(map_chromiumoxide_error)?;
        }

        let page_id = page.target_id().as_ref().to_string();
        state.pages.insert(page_id.clone(), page);
        Ok(page_id)
    }

    async fn navigate(&self, page: &str, url: &str) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        page.goto(url).await.map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn evaluate(
        &self,
        page: &str,
        expression: &str,
    ) -> Result<JsonValue, BrowserRuntimeError> {
        let page = self.page(page).await?;
        let result = page
            .evaluate(expression)
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn set_viewport(&self, page: &str, viewport: Viewport) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        apply_viewport(&page, viewport).await
    }

    async fn mouse_click(&self, page: &str, point: Point) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        page.click(CdpPoint::new(point.x, point.y))
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn mouse_move(&self, page: &str, point: Point) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        page.move_mouse(CdpPoint::new(point.x, point.y))
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn mouse_wheel(
        &self,
        page: &str,
        point: Point,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(point.x)
            .y(point.y)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .map_err(BrowserRuntimeError::Message)?;
        page.execute(params)
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    async fn press_key(&self, page: &str, key: &str) -> Result<(), BrowserRuntimeError> {
        let page = self.page(page).await?;
        for event_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let is_down = event_type == DispatchKeyEventType::KeyDown;
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(event_type)
                .key(key);
            if is_down && key.chars().count() == 1 {
                builder = builder.text(key);
            }
            let params = builder.build().map_err(BrowserRuntimeError::Message)?;
            page.execute(params)
                .await
                .map_err(map_chromiumoxide_error)?;
        }
        Ok(())
    }

    async fn screenshot(
        &self,
        page: &str,
        request: &ScreenshotRequest,
    ) -> Result<Vec<u8>, BrowserRuntimeError> {
        let page = self.page(page).await?;
        let mut params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(request.full_page && request.clip.is_none());
        if let Some(clip) = request.clip {
            params = params.clip(ClipViewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        }
        page.screenshot(params.build())
            .await
            .map_err(map_chromiumoxide_error)
    }
}

/// How long a closed browser gets to exit before it is killed.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// The process side of a launched browser.
#[async_trait]
trait BrowserProcess: Send {
    async fn close(&mut self) -> Result<(), BrowserRuntimeError>;
    async fn wait(&mut self) -> std::io::Result<()>;
    async fn kill(&mut self);
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn close(&mut self) -> Result<(), BrowserRuntimeError> {
        Browser::close(self)
            .await
            .map(|_| ())
            .map_err(map_chromiumoxide_error)
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        Browser::wait(self).await.map(|_| ())
    }

    async fn kill(&mut self) {
        if let Some(Err(err)) = Browser::kill(self).await {
            log::warn!("failed to kill browser process: {err}");
        }
    }
}

/// Ask the browser to close and wait for it to exit. A failed close or a
/// process that outlives `grace` is killed.
async fn reap<P: BrowserProcess>(process: &mut P, grace: Duration) -> Result<(), BrowserRuntimeError> {
    if let Err(err) = process.close().await {
        log::warn!("browser did not close cleanly, killing it: {err}");
        process.kill().await;
        return Err(err);
    }
    match tokio::time::timeout(grace, process.wait()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("failed to reap browser process: {err}"),
        Err(_) => {
            log::warn!("browser still running {} ms after close, killing it", grace.as_millis());
            process.kill().await;
        }
    }
    Ok(())
}

fn build_config(plan: &LaunchPlan) -> Result<BrowserConfig, BrowserRuntimeError> {
    let mut builder = BrowserConfig::builder();

    if let Some(path) = &plan.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let viewport = plan.viewport.map(|viewport| HandlerViewport {
        width: viewport.width,
        height: viewport.height,
        device_scale_factor: None,
        emulating_mobile: viewport.is_mobile(),
        is_landscape: viewport.width >= viewport.height,
        has_touch: viewport.is_mobile(),
    });

    let builder = match plan.viewport {
        Some(size) => builder.window_size(size.width, size.height),
        None => builder,
    };

    let builder = builder.viewport(viewport).args(plan.args.clone());

    let builder = if plan.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(BrowserRuntimeError::Message)
}

async fn apply_viewport(page: &ChromiumPage, viewport: Viewport) -> Result<(), BrowserRuntimeError> {
    let params = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(viewport.width))
        .height(i64::from(viewport.height))
        .device_scale_factor(1.0)
        .mobile(viewport.is_mobile())
        .build()
        .map_err(BrowserRuntimeError::Message)?;
    page.execute(params)
        .await
        .map_err(map_chromiumoxide_error)?;
    Ok(())
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> BrowserRuntimeError {
    BrowserRuntimeError::Message(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::debug!("chromiumoxide handler error: {err}");
            }
        }
    })
}
