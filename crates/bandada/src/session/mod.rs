//! Client session abstraction.
//!
//! A [`ClientSession`] is one simulated browser tab connected to the target
//! application. The harness never talks to the browser directly; everything
//! it needs — navigation, the console/fault event stream, screenshots and
//! in-page evaluation — goes through this trait, so the fleet core can be
//! exercised against scripted sessions without a browser.

use crate::event::SessionEvent;
use crate::result::HarnessResult;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

#[cfg(feature = "browser")]
pub mod cdp;
pub mod scripted;

/// One simulated browser tab / page session
#[async_trait]
pub trait ClientSession: Send + 'static {
    /// Navigate the session to the target URL
    async fn open(&mut self, url: &str) -> HarnessResult<()>;

    /// Take the session's event stream.
    ///
    /// The harness subscribes exactly once per client; a second call is an
    /// error.
    fn take_events(&mut self) -> HarnessResult<UnboundedReceiver<SessionEvent>>;

    /// Capture the session's current visual state as PNG bytes
    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>>;

    /// Evaluate an expression in the session's page context
    async fn evaluate(&mut self, expression: &str) -> HarnessResult<Value>;

    /// Close the session
    async fn close(&mut self) -> HarnessResult<()>;
}

/// Creates client sessions, consulted once per ordinal at fleet start
#[async_trait]
pub trait SessionProvider {
    /// Session type produced by this provider
    type Session: ClientSession;

    /// Create one new session
    async fn create(&mut self) -> HarnessResult<Self::Session>;
}
