//! Browser process lifecycle: launch, event plumbing, teardown.

use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, SetDownloadBehaviorBehavior,
    SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

type LaunchError = Box<dyn Error + Send + Sync>;

/// Overrides the throwaway browser profile with a persistent one.
pub const USER_DATA_DIR_ENV: &str = "HARVESTER_USER_DATA_DIR";

/// Overrides the Chromium executable.
pub const CHROME_BIN_ENV: &str = "CHROME_BIN";

/// A directory owned by the client, removed on close when `owned`.
struct ScratchDir {
    path: PathBuf,
    owned: bool,
}

impl ScratchDir {
    fn create(prefix: &str) -> Result<Self, LaunchError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| format!("System clock error: {}", e))?
            .as_nanos();
        let path =
            std::env::temp_dir().join(format!("{}-{}-{}", prefix, std::process::id(), nanos));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, owned: true })
    }

    fn profile() -> Result<Self, LaunchError> {
        match std::env::var(USER_DATA_DIR_ENV) {
            Ok(dir) => {
                let path = PathBuf::from(dir);
                std::fs::create_dir_all(&path)?;
                tracing::info!("Using browser profile {}", path.display());
                Ok(Self { path, owned: false })
            }
            Err(_) => {
                let dir = Self::create("harvester-profile")?;
                tracing::debug!("Using throwaway browser profile {}", dir.path.display());
                Ok(dir)
            }
        }
    }

    fn remove(&self) {
        if !self.owned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

/// Final state of every download the browser reported, keyed by guid.
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker(Arc<Mutex<HashMap<String, DownloadProgressState>>>);

impl DownloadTracker {
    /// `Completed` or `Canceled` once the download has finished, else `None`.
    pub fn finished(&self, guid: &str) -> Option<DownloadProgressState> {
        let states = self.0.lock().unwrap_or_else(|e| e.into_inner());
        states.get(guid).cloned()
    }

    /// Poll until `guid` finishes; callers bound this with a timeout.
    pub async fn wait_finished(&self, guid: &str, poll: Duration) -> DownloadProgressState {
        loop {
            if let Some(state) = self.finished(guid) {
                return state;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn record(&self, guid: String, state: DownloadProgressState) {
        let mut states = self.0.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(guid, state);
    }
}

/// One Chromium process with a single page.
pub struct CdpClient {
    pub browser: Browser,
    pub page: Page,
    handler_task: JoinHandle<()>,
    profile: ScratchDir,
    downloads: ScratchDir,
    tracker: DownloadTracker,
}

impl CdpClient {
    pub async fn launch(visible: bool) -> Result<Self, LaunchError> {
        let profile = ScratchDir::profile()?;
        let config = browser_config(visible, &profile.path)?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| format!("Failed to launch browser: {}", e))?;
        let handler_task = spawn_handler(handler);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("Failed to create page: {}", e))?;
        accept_dialogs(&page).await?;

        let downloads = ScratchDir::create("harvester-downloads")?;
        enable_downloads(&browser, &downloads.path).await?;
        let tracker = track_downloads(&browser).await?;

        Ok(Self {
            browser,
            page,
            handler_task,
            profile,
            downloads,
            tracker,
        })
    }

    /// Where the browser writes downloads, each file named by its guid.
    pub fn download_dir(&self) -> &Path {
        &self.downloads.path
    }

    pub fn downloads(&self) -> &DownloadTracker {
        &self.tracker
    }

    pub async fn close(mut self) -> Result<(), LaunchError> {
        let closed = self.browser.close().await;
        if let Err(e) = self.handler_task.await {
            tracing::debug!("Browser handler task failed: {}", e);
        }
        self.downloads.remove();
        self.profile.remove();
        closed.map_err(|e| format!("Error closing browser: {}", e))?;
        Ok(())
    }
}

fn browser_config(visible: bool, profile: &Path) -> Result<BrowserConfig, LaunchError> {
    // Sandboxing is unavailable in most containers.
    let mut builder = BrowserConfig::builder().no_sandbox().user_data_dir(profile);
    if visible {
        builder = builder.with_head();
    }
    if let Ok(chrome) = std::env::var(CHROME_BIN_ENV) {
        tracing::info!("Using Chrome binary {}", chrome);
        builder = builder.chrome_executable(chrome);
    }
    tracing::info!(
        "Launching Chromium ({})",
        if visible { "visible" } else { "headless" }
    );
    builder
        .build()
        .map_err(|e| format!("Invalid browser config: {}", e).into())
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("CDP handler error: {}", e);
            }
        }
        tracing::debug!("CDP handler finished");
    })
}

/// Accept alert/confirm/prompt dialogs so they never block the flow.
async fn accept_dialogs(page: &Page) -> Result<(), LaunchError> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(|e| format!("Failed to watch dialogs: {}", e))?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(dialog) = dialogs.next().await {
            tracing::info!("Accepting dialog: {}", dialog.message);
            if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                tracing::warn!("Failed to accept dialog: {}", e);
            }
        }
    });
    Ok(())
}

/// Save downloads into `dir` under their guid and emit `Browser.download*` events.
async fn enable_downloads(browser: &Browser, dir: &Path) -> Result<(), LaunchError> {
    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(dir.to_string_lossy().to_string())
        .events_enabled(true)
        .build()
        .map_err(|e| format!("Invalid download behavior: {}", e))?;
    browser
        .execute(params)
        .await
        .map_err(|e| format!("Failed to enable downloads: {}", e))?;
    tracing::debug!("Downloads go to {}", dir.display());
    Ok(())
}

async fn track_downloads(browser: &Browser) -> Result<DownloadTracker, LaunchError> {
    let mut progress = browser
        .event_listener::<EventDownloadProgress>()
        .await
        .map_err(|e| format!("Failed to watch download progress: {}", e))?;
    let tracker = DownloadTracker::default();
    let sink = tracker.clone();
    tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            if event.state != DownloadProgressState::InProgress {
                tracing::debug!("Download {} {:?}", event.guid, event.state);
                sink.record(event.guid.clone(), event.state.clone());
            }
        }
    });
    Ok(tracker)
}
