#[macro_use]
extern crate tracing;

use chromiumoxide::{
    browser,
    cdp::browser_protocol::target::{
        CreateTargetParams,
        EventDetachedFromTarget,
    },
    handler::viewport::Viewport,
    Browser,
    Handler,
    Page,
};
use eyre::{
    Context as _,
    Result,
};
use futures::{
    FutureExt as _,
    StreamExt as _,
};
use meet_recorder_config::{
    BrowserConfig,
    SessionConfig,
};
use std::{
    future::Future,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

pub mod capture;
pub mod chrome;
pub mod driver;
pub mod join;
pub mod presence;
pub mod selectors;
pub mod session;
pub mod sink;
pub mod state;

#[cfg(test)]
mod testing;

pub use chrome::ChromePage;
pub use driver::PageDriver;
pub use session::{
    Session,
    SessionController,
    ShutdownTrigger,
};
pub use state::{
    Lifecycle,
    LifecycleState,
};

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

fn get_binary() -> Result<PathBuf> {
    // Chromium / Chrome can have different binary names
    let chrome = ["chromium", "google-chrome", "google-chrome-stable", "chrome"]
        .iter()
        .find_map(|name| {
            which::which(name).ok().map(|path| {
                debug!(?path, "found {} at", name);
                path
            })
        })
        .ok_or_else(|| eyre::eyre!("failed to find chromium or google-chrome binary"))?;
    debug!(?chrome, "chrome found at");
    Ok(chrome)
}

fn chrome_args() -> Vec<String> {
    [
        "--no-startup-window",
        "--use-fake-ui-for-media-stream",
        "--disable-blink-features=AutomationControlled",
        "--auto-select-tab-capture-source-by-title=Meet",
        "--enable-features=TabCapture,WebRTCPipeWireCapturer",
        "--allow-http-screen-capture",
        "--autoplay-policy=no-user-gesture-required",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Create a new browser instance with the browser config.
async fn create_browser(browser_config: &BrowserConfig) -> Result<(Browser, Handler)> {
    let binary = get_binary()?;

    let mut config = browser::BrowserConfig::builder().window_size(WINDOW_WIDTH, WINDOW_HEIGHT);

    config = if browser_config.headless {
        config.viewport(Viewport {
            width: WINDOW_WIDTH,
            height: WINDOW_HEIGHT,
            ..Default::default()
        })
    } else {
        config.with_head().viewport(None) // Fill the entire window
    };

    let config = config
        .user_data_dir(&browser_config.user_data_dir)
        .chrome_executable(binary)
        .args(chrome_args())
        .build()
        .map_err(|e| eyre::eyre!(e))
        .context("failed to build browser config")?;

    debug!(
        user_data_dir = ?browser_config.user_data_dir.as_ref(),
        persistent = browser_config.user_data_dir.is_persistent(),
        headless = browser_config.headless,
        "Launching browser"
    );

    browser::Browser::launch(config)
        .await
        .context("failed to launch browser")
}

fn drive_browser_events(mut handler: Handler) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                if err.to_string().contains("ResetWithoutClosingHandshake") {
                    error!("Browser unexpectedly closed");
                    break;
                }
                error!("error in browser handler: {err:?}");
            }
        }
        debug!("Browser event handler stopped");
    })
}

async fn create_page(browser: &Browser) -> Result<Page> {
    if let Ok(Some(page)) = browser
        .pages()
        .await
        .context("failed to get pages")
        .map(|pages| pages.into_iter().next())
    {
        return Ok(page);
    }

    browser
        .new_page(
            CreateTargetParams::builder()
                .url("about:blank")
                .build()
                .map_err(|e| eyre::eyre!(e))?,
        )
        .await
        .context("failed to create new page")
}

const PAGE_RETRIES: usize = 5;

/// Runs `op` until it succeeds, backing off between failures. Gives up with
/// the last error after `retries` retries.
async fn retry_with_backoff<T, F, Fut>(what: &str, retries: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = maybe_backoff::MaybeBackoff::default();
    let mut attempt = 0;
    loop {
        backoff.sleep().await;
        match op().await {
            Ok(value) => return Ok(value),
            Err(_) if attempt < retries => {
                attempt += 1;
                backoff.arm();
                warn!(?attempt, "Failed to {what}, retrying...");
            }
            Err(err) => return Err(err),
        }
    }
}

async fn create_page_retry(browser: &Browser) -> Result<Page> {
    retry_with_backoff("create a new page", PAGE_RETRIES, || create_page(browser)).await
}

/// Resolves once the tab is closed from outside, or the browser goes away.
async fn page_closed(browser: &Browser, page: &Page) -> Result<impl Future<Output = ()>> {
    let mut detached = browser
        .event_listener::<EventDetachedFromTarget>()
        .await
        .context("failed to create event listener")?;
    let target_id = page.target_id().clone();

    Ok(async move {
        while let Some(event) = detached.next().await {
            #[allow(deprecated)]
            let detached_target = event.target_id.as_ref();
            if detached_target.map_or(true, |id| *id == target_id) {
                return;
            }
        }
    })
}

/// Installs the Ctrl-C and SIGTERM handlers right away. The returned future
/// resolves on the first of them, including signals that arrived before it
/// was first polled.
#[cfg(unix)]
fn termination_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{
        signal,
        SignalKind,
    };

    let mut interrupt = signal(SignalKind::interrupt()).context("failed to listen for ctrl-c")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn termination_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to watch for termination signals: {err:#}");
            std::future::pending::<()>().await;
        }
    })
}

/// Joins the configured room, records it and returns once the session is
/// over and the recording is closed.
pub async fn record(config: SessionConfig) -> Result<()> {
    let signal = match termination_signal() {
        Ok(signal) => signal.boxed(),
        Err(err) => {
            error!("Unable to watch for termination signals: {err:#}");
            std::future::pending::<()>().boxed()
        }
    };

    let browser_config = BrowserConfig::new(&config)?;
    let (browser, handler) = create_browser(&browser_config).await?;
    let browser_event_task_handle = drive_browser_events(handler);

    let page = create_page_retry(&browser).await?;
    let closed = page_closed(&browser, &page).await?;
    let driver = Arc::new(ChromePage::new(browser, page, browser_config).await?);

    let shutdown = async move {
        tokio::select! {
            () = signal => ShutdownTrigger::Signal,
            () = closed => {
                warn!("Browser unexpectedly closed");
                ShutdownTrigger::PageClosed
            }
        }
    };

    let result = SessionController::new(Session::new(config), driver).run(shutdown).await;

    if tokio::time::timeout(Duration::from_secs(5), browser_event_task_handle)
        .await
        .is_err()
    {
        debug!("Browser event handler still running, leaving it behind");
    }

    result
}
