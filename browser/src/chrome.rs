//! [`PageDriver`] for a Chromium page driven over the DevTools protocol.

use crate::driver::{
    Locator,
    PageDriver,
    Permission,
    POLL_INTERVAL,
};
use async_trait::async_trait;
use chromiumoxide::{
    cdp::{
        browser_protocol::browser::{
            GrantPermissionsParams,
            PermissionType,
        },
        js_protocol::runtime::{
            AddBindingParams,
            ConsoleApiCalledType,
            EvaluateParams,
            EventBindingCalled,
            EventConsoleApiCalled,
            RemoteObject,
        },
    },
    Browser,
    Element,
    Page,
};
use eyre::{
    bail,
    eyre,
    Context as _,
    Result,
};
use futures::{
    stream::BoxStream,
    StreamExt as _,
};
use meet_recorder_config::BrowserConfig;
use serde_json::Value;
use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::Instant,
};
use url::Url;

/// Attribute used to hand an element found by [`Locator`] over to a CSS
/// lookup.
const TARGET_ATTRIBUTE: &str = "data-meet-recorder-target";

/// Resolves a serialized [`Locator`] to the first visible match and runs one
/// operation on it.
const PROBE: &str = r#"(locator, op, arg) => {
  const normalize = (text) => (text || '').replace(/\s+/g, ' ').trim();
  const matchesText = (element) => {
    if (!locator.text) {
      return true;
    }
    const text = normalize(element.innerText || element.textContent);
    if (locator.text.kind === 'exact') {
      return text === locator.text.value;
    }
    return text.toLowerCase().includes(locator.text.value.toLowerCase());
  };
  const visible = (element) => {
    const style = window.getComputedStyle(element);
    if (style.visibility === 'hidden' || style.display === 'none') {
      return false;
    }
    const rect = element.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };

  let element;
  try {
    element = Array.from(document.querySelectorAll(locator.css)).find(
      (candidate) => matchesText(candidate) && visible(candidate),
    );
  } catch (err) {
    return null;
  }
  if (!element) {
    return op === 'visible' ? false : null;
  }

  switch (op) {
    case 'visible':
      return true;
    case 'mark':
      element.setAttribute(arg.name, arg.token);
      return true;
    case 'value':
      return typeof element.value === 'string' ? element.value : normalize(element.innerText);
    case 'attribute':
      return element.getAttribute(arg);
    default:
      return null;
  }
}"#;

/// A Chromium tab plus the browser process it belongs to.
pub struct ChromePage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    console: JoinHandle<()>,
    marks: AtomicU64,
    // Keeps a temporary profile alive until the browser is gone.
    _browser_config: BrowserConfig,
}

impl ChromePage {
    pub async fn new(browser: Browser, page: Page, browser_config: BrowserConfig) -> Result<Self> {
        let console = forward_console(&page).await?;
        Ok(Self {
            page,
            browser: Mutex::new(Some(browser)),
            console,
            marks: AtomicU64::new(0),
            _browser_config: browser_config,
        })
    }

    async fn probe(&self, locator: &Locator, op: &str, arg: Value) -> Result<Value> {
        let locator = serde_json::to_string(locator).context("failed to serialize locator")?;
        let arg = serde_json::to_string(&arg).context("failed to serialize probe argument")?;
        self.evaluate(&format!("({PROBE})({locator}, {op:?}, {arg})")).await
    }

    /// Tags the element behind `locator` so it can be fetched as an
    /// [`Element`] for real input events.
    async fn element(&self, locator: &Locator) -> Result<Element> {
        let token = self.marks.fetch_add(1, Ordering::Relaxed).to_string();
        let marked = self
            .probe(
                locator,
                "mark",
                serde_json::json!({ "name": TARGET_ATTRIBUTE, "token": token }),
            )
            .await?;
        if marked != Value::Bool(true) {
            bail!("no visible element for {locator}");
        }

        self.page
            .find_element(format!(r#"[{TARGET_ATTRIBUTE}="{token}"]"#))
            .await
            .with_context(|| format!("Could not find the {locator} element"))
    }
}

async fn forward_console(page: &Page) -> Result<JoinHandle<()>> {
    let mut events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .context("failed to listen for console messages")?;

    Ok(tokio::task::spawn(async move {
        while let Some(event) = events.next().await {
            let text = event.args.iter().map(console_text).collect::<Vec<_>>().join(" ");
            match event.r#type {
                ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert | ConsoleApiCalledType::Warning => {
                    warn!(target: "browser", "{text}")
                }
                ConsoleApiCalledType::Log | ConsoleApiCalledType::Info => info!(target: "browser", "{text}"),
                _ => debug!(target: "browser", "{text}"),
            }
        }
    }))
}

fn console_text(arg: &RemoteObject) -> String {
    match (&arg.value, &arg.description) {
        (Some(Value::String(text)), _) => text.clone(),
        (Some(value), _) => value.to_string(),
        (None, Some(description)) => description.clone(),
        (None, None) => String::new(),
    }
}

impl From<Permission> for PermissionType {
    fn from(permission: Permission) -> Self {
        match permission {
            Permission::Microphone => PermissionType::AudioCapture,
            Permission::Camera => PermissionType::VideoCapture,
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &Url) -> Result<()> {
        self.page
            .goto(url.to_string())
            .await
            .with_context(|| format!("failed to navigate to {url}"))?;

        let navigation = self
            .page
            .wait_for_navigation_response()
            .await
            .context("Page could not navigate to the room")?;

        if let Some(text) = navigation.and_then(|request| request.failure_text.clone()) {
            bail!("Navigating to {url} failed: {text}");
        }

        debug!(%url, "Navigated to page");
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<Url>> {
        let url = self.page.url().await.context("failed to read page url")?;
        Ok(url.and_then(|url| url.parse().ok()))
    }

    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.probe(locator, "visible", Value::Null).await? == Value::Bool(true) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.element(locator)
            .await?
            .click()
            .await
            .with_context(|| format!("Could not click on {locator}"))?;
        trace!(%locator, "Clicked");
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let input = self.element(locator).await?;
        input
            .focus()
            .await
            .context("failed to focus the input")?
            .call_js_fn("function() { this.value = ''; }", true)
            .await
            .context("failed to empty the input")?;
        input.type_str(text).await.context("failed to type into the input")?;
        Ok(())
    }

    async fn input_value(&self, locator: &Locator) -> Result<String> {
        match self.probe(locator, "value", Value::Null).await? {
            Value::String(value) => Ok(value),
            _ => bail!("no visible element for {locator}"),
        }
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        match self.probe(locator, "attribute", Value::String(name.to_string())).await? {
            Value::String(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| eyre!(e))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .context("failed to evaluate script")?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn register_host_callback(&self, name: &str) -> Result<BoxStream<'static, String>> {
        let events = self
            .page
            .event_listener::<EventBindingCalled>()
            .await
            .context("failed to listen for binding calls")?;

        self.page
            .execute(AddBindingParams::new(name))
            .await
            .with_context(|| format!("failed to expose {name} to the page"))?;

        let name = name.to_string();
        Ok(events
            .filter_map(move |event| {
                let payload = (event.name == name).then(|| event.payload.clone());
                async move { payload }
            })
            .boxed())
    }

    async fn grant_permissions(&self, permissions: &[Permission], origin: &str) -> Result<()> {
        let params = GrantPermissionsParams::builder()
            .permissions(permissions.iter().copied().map(PermissionType::from).collect::<Vec<_>>())
            .origin(origin)
            .build()
            .map_err(|e| eyre!(e))?;

        let browser = self.browser.lock().await;
        let Some(browser) = browser.as_ref() else {
            bail!("browser already closed");
        };
        browser
            .execute(params)
            .await
            .context("failed to grant permissions")?;

        debug!(?permissions, origin, "Granted permissions");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        debug!("Closing the browser...");

        if let Err(err) = self.page.clone().close().await {
            debug!("Error closing page: {err}");
        }

        browser.close().await.context("failed to close browser")?;
        browser.wait().await.context("failed to wait for browser exit")?;
        self.console.abort();

        info!("Closed the browser");
        Ok(())
    }
}
