//! Headless Chromium fetcher.
//!
//! Every fetch launches its own browser with a throwaway profile directory.
//! [`BrowserSession`] owns the process, the CDP handler task and the profile,
//! so dropping it at any point (error, timeout, cancelled request) tears all
//! three down.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{FetchError, PageFetcher};
use crate::config::FetchConfig;

/// How long a graceful close may take before we fall back to killing.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub struct BrowserFetcher {
    config: FetchConfig,
}

impl BrowserFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let timeout = self.config.timeout;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let session = tokio::time::timeout_at(deadline, BrowserSession::launch(&self.config))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;
        debug!(elapsed = ?started.elapsed(), "Browser launched");

        let outcome = tokio::time::timeout_at(deadline, session.render(url, self.config.settle_delay)).await;
        tokio::spawn(session.shutdown());

        let html = outcome.map_err(|_| FetchError::Timeout(timeout))??;
        info!(
            url = %url,
            bytes = html.len(),
            elapsed = ?started.elapsed(),
            "Rendered page"
        );
        Ok(html)
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// Temporary Chromium profile, removed on drop.
struct ProfileDir {
    path: PathBuf,
}

impl ProfileDir {
    fn create() -> Result<Self, FetchError> {
        let path = std::env::temp_dir().join(format!("ai_web_scraper_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| {
            FetchError::Launch(format!("cannot create profile dir {}: {}", path.display(), e))
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to clean up profile dir {}: {}", self.path.display(), e);
        }
    }
}

/// A running browser. Field order matters: the browser (and its child
/// process) drops before the profile directory it uses.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    profile: ProfileDir,
}

impl BrowserSession {
    async fn launch(config: &FetchConfig) -> Result<Self, FetchError> {
        let profile = ProfileDir::create()?;

        let mut builder = BrowserConfig::builder()
            .headless_mode(HeadlessMode::default())
            .request_timeout(config.timeout)
            .window_size(1920, 1080)
            .user_data_dir(profile.path())
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-notifications")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio");

        if let Some(path) = &config.chromium_path {
            builder = builder.chrome_executable(path);
        }

        if should_disable_sandbox() {
            builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
        }

        let browser_config = builder.build().map_err(FetchError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    // chromiumoxide does not know every CDP message Chrome sends
                    trace!("Browser handler error: {}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            profile,
        })
    }

    async fn render(&self, url: &Url, settle_delay: Duration) -> Result<String, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Navigation(format!("cannot open page: {}", e)))?;

        page.goto(url.as_str())
            .await
            .map_err(|e| FetchError::Navigation(format!("{}: {}", url, e)))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| FetchError::Navigation(format!("page did not finish loading: {}", e)))?;

        // Late XHR-driven content gets a fixed window to land
        if !settle_delay.is_zero() {
            tokio::time::sleep(settle_delay).await;
        }

        page.content()
            .await
            .map_err(|e| FetchError::Navigation(format!("cannot read page content: {}", e)))
    }

    /// Best-effort graceful close within [`CLOSE_GRACE`]. Whatever is left
    /// is reclaimed on drop.
    async fn shutdown(mut self) {
        let browser = &mut self.browser;
        let closed = tokio::time::timeout(CLOSE_GRACE, async move {
            browser.close().await.map_err(|e| e.to_string())?;
            browser.wait().await.map_err(|e| e.to_string())
        })
        .await;

        match closed {
            Ok(Ok(_)) => trace!("Browser exited"),
            Ok(Err(e)) => warn!("Browser did not exit cleanly: {}", e),
            Err(_) => warn!("Browser close timed out after {:?}", CLOSE_GRACE),
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        debug!(profile = %self.profile.path.display(), "Browser session released");
    }
}

/// Detect containerized environments where the Chromium sandbox cannot run.
fn should_disable_sandbox() -> bool {
    Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dir_is_removed_on_drop() {
        let profile = ProfileDir::create().unwrap();
        let path = profile.path().to_path_buf();
        assert!(path.exists());

        drop(profile);
        assert!(!path.exists());
    }

    fn fetch_config(executable: PathBuf, timeout: Duration) -> FetchConfig {
        FetchConfig {
            kind: crate::config::FetcherKind::Browser,
            timeout,
            settle_delay: Duration::ZERO,
            chromium_path: Some(executable),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let fetcher = BrowserFetcher::new(fetch_config(
            PathBuf::from("/nonexistent/chromium"),
            Duration::from_secs(5),
        ));
        let url = Url::parse("https://example.com").unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Launch(_)), "got {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_launch_is_bounded_by_the_fetch_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = ProfileDir::create().unwrap();
        let executable = dir.path().join("hung-chromium");
        std::fs::write(&executable, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();

        let timeout = Duration::from_millis(500);
        let fetcher = BrowserFetcher::new(fetch_config(executable, timeout));
        let url = Url::parse("https://example.com").unwrap();

        let started = Instant::now();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::Timeout(t) if t == timeout), "got {:?}", err);
        assert!(started.elapsed() < timeout + Duration::from_secs(1), "took {:?}", started.elapsed());
    }
}
