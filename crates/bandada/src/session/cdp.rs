//! Real browser sessions via the Chrome `DevTools` Protocol.
//!
//! Only compiled with the `browser` feature. One headless Chromium is
//! launched per provider; each client session is one page in it. Console
//! output and uncaught exceptions are forwarded to the harness as
//! [`SessionEvent`]s.

use crate::event::{InternalFault, SessionEvent, StackFrame};
use crate::result::{HarnessError, HarnessResult};
use crate::session::{ClientSession, SessionProvider};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    EventConsoleApiCalled, EventExceptionThrown, ExceptionDetails,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

/// Launch options for the shared browser behind a fleet of CDP sessions
#[derive(Debug, Clone)]
pub struct CdpLaunchOptions {
    /// Run the browser headless
    pub headless: bool,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Keep persistent cookie storage. When false every session gets its
    /// own ephemeral incognito browser context, so no cookies are shared
    /// between clients or survive the run.
    pub cookies_enabled: bool,
    /// Path to the chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
}

impl Default for CdpLaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            cookies_enabled: true,
            chromium_path: None,
        }
    }
}

impl CdpLaunchOptions {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable the sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Enable or disable cookie storage
    #[must_use]
    pub const fn with_cookies(mut self, enabled: bool) -> Self {
        self.cookies_enabled = enabled;
        self
    }

    /// Set the chromium binary path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }
}

/// Session provider backed by one shared headless Chromium
#[derive(Debug)]
pub struct CdpSessionProvider {
    browser: Browser,
    handler: JoinHandle<()>,
    ephemeral_contexts: bool,
}

impl CdpSessionProvider {
    /// Launch the shared browser
    pub async fn launch(options: CdpLaunchOptions) -> HarnessResult<Self> {
        let mut builder = BrowserConfig::builder();

        if !options.headless {
            builder = builder.with_head();
        }
        if !options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = options.chromium_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(HarnessError::browser_launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarnessError::browser_launch(e.to_string()))?;

        // Drive the CDP connection until it drops.
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            ephemeral_contexts: !options.cookies_enabled,
        })
    }

    /// Close the shared browser
    pub async fn close(mut self) -> HarnessResult<()> {
        self.browser
            .close()
            .await
            .map_err(|e| HarnessError::browser_launch(e.to_string()))?;
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for CdpSessionProvider {
    type Session = CdpSession;

    async fn create(&mut self) -> HarnessResult<CdpSession> {
        // Without persistent cookies each page lives in its own incognito
        // context; targets in the default context would share cookie storage.
        let context = if self.ephemeral_contexts {
            let id = self
                .browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await
                .map_err(|e| HarnessError::session(e.to_string()))?;
            Some(id)
        } else {
            None
        };

        let params = blank_page_params(context).map_err(HarnessError::session)?;
        let page = self
            .browser
            .new_page(params)
            .await
            .map_err(|e| HarnessError::session(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let mut console = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| HarnessError::session(e.to_string()))?;
        let console_tx = tx.clone();
        let console_task = tokio::spawn(async move {
            while let Some(event) = console.next().await {
                if console_tx
                    .send(SessionEvent::Console(console_text(&event)))
                    .is_err()
                {
                    break;
                }
            }
        });

        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| HarnessError::session(e.to_string()))?;
        let fault_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                if tx
                    .send(SessionEvent::Fault(fault_from(&event.exception_details)))
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(CdpSession {
            page,
            events: Some(rx),
            listeners: vec![console_task, fault_task],
        })
    }
}

/// One browser page driven over CDP
#[derive(Debug)]
pub struct CdpSession {
    page: Page,
    events: Option<UnboundedReceiver<SessionEvent>>,
    listeners: Vec<JoinHandle<()>>,
}

#[async_trait]
impl ClientSession for CdpSession {
    async fn open(&mut self, url: &str) -> HarnessResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| HarnessError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn take_events(&mut self) -> HarnessResult<UnboundedReceiver<SessionEvent>> {
        self.events
            .take()
            .ok_or_else(|| HarnessError::session("event stream already taken"))
    }

    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        let screenshot = self
            .page
            .execute(params)
            .await
            .map_err(|e| HarnessError::screenshot(e.to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| HarnessError::screenshot(e.to_string()))
    }

    async fn evaluate(&mut self, expression: &str) -> HarnessResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| HarnessError::evaluation(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| HarnessError::evaluation(e.to_string()))
    }

    async fn close(&mut self) -> HarnessResult<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| HarnessError::session(e.to_string()))?;
        Ok(())
    }
}

/// Target parameters for a session's initial blank page, optionally bound
/// to a dedicated browser context
fn blank_page_params(context: Option<BrowserContextId>) -> Result<CreateTargetParams, String> {
    let mut builder = CreateTargetParams::builder().url("about:blank");
    if let Some(id) = context {
        builder = builder.browser_context_id(id);
    }
    builder.build()
}

/// Join a console call's arguments into one text line
fn console_text(event: &EventConsoleApiCalled) -> String {
    event
        .args
        .iter()
        .filter_map(|arg| {
            arg.value
                .as_ref()
                .map(|value| match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .or_else(|| arg.description.clone())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map CDP exception details onto the harness fault type
fn fault_from(details: &ExceptionDetails) -> InternalFault {
    let message = details
        .exception
        .as_ref()
        .and_then(|exception| exception.description.clone())
        .unwrap_or_else(|| details.text.clone());

    let trace = details
        .stack_trace
        .as_ref()
        .map(|stack| {
            stack
                .call_frames
                .iter()
                .map(|frame| StackFrame {
                    file: frame.url.clone(),
                    line: frame.line_number.max(0) as u64,
                    function: if frame.function_name.is_empty() {
                        None
                    } else {
                        Some(frame.function_name.clone())
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    InternalFault { message, trace }
}
