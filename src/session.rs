//! Session controller: one browser process plus its pages for one run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use thiserror::Error;

use crate::browser::{BrowserRuntime, BrowserRuntimeError, LaunchPlan, PageId, PageSetup};
use crate::config::HarnessConfig;
use crate::logging::{CATEGORY_SESSION, HarnessLogger};
use crate::page::SessionPage;

/// Fatal: the browser could not be brought up.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to launch browser: {0}")]
    Launch(#[source] BrowserRuntimeError),
    #[error("failed to open initial page: {0}")]
    Page(#[source] BrowserRuntimeError),
}

pub struct SessionController;

impl SessionController {
    /// Launch the browser and open the first page with the configured
    /// viewport, color scheme and local-state overrides. Any failure after
    /// the launch started releases the browser before returning.
    pub async fn open<R: BrowserRuntime>(
        runtime: Arc<R>,
        config: &HarnessConfig,
        logger: &HarnessLogger,
    ) -> Result<Session<R>, LaunchError> {
        let plan = launch_plan(config);
        let setup = page_setup(config);

        logger.info(
            "launching browser",
            Some(CATEGORY_SESSION),
            Some(json!({
                "headless": plan.headless,
                "viewport": plan.viewport.map(|v| v.to_string()),
                "colorScheme": setup.color_scheme.as_str(),
            })),
        );

        if let Err(err) = runtime.launch(&plan).await {
            release(runtime.as_ref(), logger).await;
            return Err(LaunchError::Launch(err));
        }

        let first = match runtime.new_page(&setup).await {
            Ok(page) => page,
            Err(err) => {
                release(runtime.as_ref(), logger).await;
                return Err(LaunchError::Page(err));
            }
        };

        logger.debug(
            format!("opened page {first}"),
            Some(CATEGORY_SESSION),
            None,
        );

        Ok(Session {
            runtime,
            setup,
            pages: vec![first],
            active: 0,
            closed: AtomicBool::new(false),
        })
    }
}

async fn release<R: BrowserRuntime + ?Sized>(runtime: &R, logger: &HarnessLogger) {
    if let Err(err) = runtime.shutdown().await {
        logger.error(
            format!("failed to release browser: {err}"),
            Some(CATEGORY_SESSION),
            None,
        );
    }
}

pub(crate) fn launch_plan(config: &HarnessConfig) -> LaunchPlan {
    LaunchPlan {
        headless: config.headless,
        chrome_executable: config.chrome_executable.clone(),
        viewport: config.viewport,
        args: vec![
            "--no-first-run".into(),
            "--no-default-browser-check".into(),
            "--disable-gpu".into(),
            "--hide-scrollbars".into(),
        ],
    }
}

pub(crate) fn page_setup(config: &HarnessConfig) -> PageSetup {
    PageSetup {
        url: "about:blank".into(),
        viewport: config.viewport,
        color_scheme: config.color_scheme,
        init_scripts: PageSetup::local_storage_script(&config.local_storage)
            .into_iter()
            .collect(),
    }
}

/// A live browser with one or more pages. Exclusively owned by one run.
pub struct Session<R: BrowserRuntime> {
    runtime: Arc<R>,
    setup: PageSetup,
    pages: Vec<PageId>,
    active: usize,
    closed: AtomicBool,
}

impl<R: BrowserRuntime> Session<R> {
    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    /// The page the executor currently drives.
    pub fn active_page(&self) -> SessionPage<'_, R> {
        SessionPage::new(self.runtime.as_ref(), self.pages[self.active].clone())
    }

    /// Open another page with the session's emulation settings.
    pub async fn open_page(&mut self) -> Result<PageId, BrowserRuntimeError> {
        let page = self.runtime.new_page(&self.setup).await?;
        self.pages.push(page.clone());
        Ok(page)
    }

    pub fn set_active_page(&mut self, page: &str) -> Result<(), BrowserRuntimeError> {
        let index = self
            .pages
            .iter()
            .position(|id| id == page)
            .ok_or_else(|| BrowserRuntimeError::UnknownPage(page.to_string()))?;
        self.active = index;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the browser. Only the first call reaches the runtime.
    pub async fn close(&self, logger: &HarnessLogger) -> Result<(), BrowserRuntimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        logger.info("closing browser", Some(CATEGORY_SESSION), None);
        self.runtime.shutdown().await
    }
}

impl<R: BrowserRuntime> Drop for Session<R> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::warn!("session dropped without close; abandoning browser");
            self.runtime.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::tests::RecordingRuntime;
    use crate::browser::{ColorScheme, Viewport};

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.viewport = Some(Viewport::new(375, 667));
        config.color_scheme = ColorScheme::Dark;
        config
            .local_storage
            .insert("darkMode".into(), "true".into());
        config
    }

    #[tokio::test]
    async fn open_applies_page_setup() {
        let runtime = Arc::new(RecordingRuntime::default());
        let session = SessionController::open(runtime.clone(), &config(), &HarnessLogger::default())
            .await
            .unwrap();

        assert_eq!(session.pages(), ["page-1".to_string()]);
        let launches = runtime.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert!(launches[0].headless);
        assert_eq!(launches[0].viewport, Some(Viewport::new(375, 667)));

        let setups = runtime.setups.lock().unwrap();
        assert_eq!(setups[0].color_scheme, ColorScheme::Dark);
        assert_eq!(setups[0].init_scripts.len(), 1);
        assert!(setups[0].init_scripts[0].contains("darkMode"));
    }

    #[tokio::test]
    async fn launch_failure_releases_browser_once() {
        let runtime = Arc::new(RecordingRuntime {
            fail_launch: true,
            ..Default::default()
        });
        let err = SessionController::open(runtime.clone(), &config(), &HarnessLogger::default())
            .await
            .err()
            .expect("launch should fail");
        assert!(matches!(err, LaunchError::Launch(_)));
        assert_eq!(*runtime.shutdowns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn first_page_failure_releases_browser() {
        let runtime = Arc::new(RecordingRuntime {
            fail_new_page: true,
            ..Default::default()
        });
        let err = SessionController::open(runtime.clone(), &config(), &HarnessLogger::default())
            .await
            .err()
            .expect("page should fail");
        assert!(matches!(err, LaunchError::Page(_)));
        assert_eq!(*runtime.shutdowns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let runtime = Arc::new(RecordingRuntime::default());
        let logger = HarnessLogger::default();
        let session = SessionController::open(runtime.clone(), &config(), &logger)
            .await
            .unwrap();

        session.close(&logger).await.unwrap();
        session.close(&logger).await.unwrap();
        assert!(session.is_closed());
        assert_eq!(*runtime.shutdowns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn extra_pages_can_become_active() {
        let runtime = Arc::new(RecordingRuntime::default());
        let mut session =
            SessionController::open(runtime.clone(), &config(), &HarnessLogger::default())
                .await
                .unwrap();

        let second = session.open_page().await.unwrap();
        assert_eq!(second, "page-2");
        session.set_active_page(&second).unwrap();
        assert_eq!(session.active_page().id(), "page-2");
        assert!(session.set_active_page("page-9").is_err());
        assert_eq!(runtime.setups.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropping_an_open_session_abandons_the_browser() {
        let runtime = Arc::new(RecordingRuntime::default());
        let session = SessionController::open(runtime.clone(), &config(), &HarnessLogger::default())
            .await
            .unwrap();
        drop(session);

        assert_eq!(*runtime.abandons.lock().unwrap(), 1);
        assert_eq!(*runtime.shutdowns.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn dropping_a_closed_session_leaves_runtime_alone() {
        let runtime = Arc::new(RecordingRuntime::default());
        let logger = HarnessLogger::default();
        let session = SessionController::open(runtime.clone(), &config(), &logger)
            .await
            .unwrap();
        session.close(&logger).await.unwrap();
        drop(session);

        assert_eq!(*runtime.abandons.lock().unwrap(), 0);
        assert_eq!(*runtime.shutdowns.lock().unwrap(), 1);
    }
}
